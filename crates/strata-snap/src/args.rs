use std::path::PathBuf;

use clap::Parser;

/// Render a binary mesh offscreen and save the frame as a PNG.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "strata-snap")]
#[command(about = "Render a binary mesh offscreen and save a PNG screenshot")]
pub struct Args {
    /// Binary mesh to render. A built-in cube when absent.
    pub mesh: Option<String>,

    /// Output PNG path
    #[arg(short, long, default_value = "snap.png")]
    pub out: PathBuf,

    /// Offscreen target size, as WxH
    #[arg(long, default_value = "800x600", value_parser = parse_size)]
    pub size: Size,

    /// Frames rendered before the screenshot is taken
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub frames: u32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

fn parse_size(v: &str) -> Result<Size, String> {
    let (w, h) = v
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("size {v:?} is not WxH"))?;
    let width: u32 = w.parse().map_err(|e| format!("bad width in {v:?}: {e}"))?;
    let height: u32 = h.parse().map_err(|e| format!("bad height in {v:?}: {e}"))?;
    if width == 0 || height == 0 {
        return Err(format!("size {v:?} has a zero dimension"));
    }
    Ok(Size { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("strata-snap").chain(args.iter().copied()))
    }

    #[test]
    fn defaults_without_arguments() {
        let a = parse(&[]).unwrap();
        assert_eq!(a.mesh, None);
        assert_eq!(a.out, PathBuf::from("snap.png"));
        assert_eq!(a.size, Size { width: 800, height: 600 });
        assert_eq!(a.frames, 1);
    }

    #[test]
    fn reads_mesh_and_options() {
        let a = parse(&["ship.bin", "-o", "ship.png", "--size", "320x200", "--frames", "3"]).unwrap();
        assert_eq!(a.mesh.as_deref(), Some("ship.bin"));
        assert_eq!(a.out, PathBuf::from("ship.png"));
        assert_eq!(a.size, Size { width: 320, height: 200 });
        assert_eq!(a.frames, 3);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--size", "0x10"]).is_err());
        assert!(parse(&["--size", "wide"]).is_err());
        assert!(parse(&["--frames", "0"]).is_err());
        assert!(parse(&["a.bin", "b.bin"]).is_err());
        assert!(parse(&["--what"]).is_err());
        assert!(parse(&["--out"]).is_err());
    }

    #[test]
    fn size_accepts_either_case() {
        assert_eq!(parse_size("64X48"), Ok(Size { width: 64, height: 48 }));
    }
}
