use std::ffi::OsString;
use std::path::Path;
use std::process::{Command, Stdio};

use crate::encode::output::ensure_parent_dir;
use crate::foundation::error::{GpucapError, GpucapResult};

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Arguments for re-encoding an intermediate animation as H.264 MP4.
///
/// Odd dimensions are truncated to even since yuv420p subsamples chroma 2x2.
pub fn transcode_args(input: &Path, output: &Path, overwrite: bool) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(20);
    args.push(if overwrite { "-y" } else { "-n" }.into());
    args.extend(["-loglevel", "error", "-i"].map(OsString::from));
    args.push(input.into());
    args.extend(
        [
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-vf",
            "scale=trunc(iw/2)*2:trunc(ih/2)*2",
            "-movflags",
            "+faststart",
        ]
        .map(OsString::from),
    );
    args.push(output.into());
    args
}

/// Run ffmpeg to turn `input` into an MP4 at `output`. A failed run leaves no `output` behind.
#[tracing::instrument(level = "debug", skip_all, fields(output = %output.display()))]
pub fn transcode_to_mp4(input: &Path, output: &Path, overwrite: bool) -> GpucapResult<()> {
    if !overwrite && output.exists() {
        return Err(GpucapError::validation(format!(
            "output file '{}' already exists",
            output.display()
        )));
    }
    ensure_parent_dir(output)?;

    let out = Command::new("ffmpeg")
        .args(transcode_args(input, output, overwrite))
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            GpucapError::encode(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

    if !out.status.success() {
        let _ = std::fs::remove_file(output);
        return Err(GpucapError::encode(format!(
            "ffmpeg exited with status {}: {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_select_overwrite_flag_and_even_scaling() {
        let args = transcode_args(Path::new("in.gif"), Path::new("out.mp4"), false);
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args.first().map(String::as_str), Some("-n"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "in.gif");
        assert!(args.iter().any(|a| a == "scale=trunc(iw/2)*2:trunc(ih/2)*2"));
        assert!(args.iter().any(|a| a == "yuv420p"));

        let args = transcode_args(Path::new("a"), Path::new("b"), true);
        assert_eq!(args[0], OsString::from("-y"));
    }

    #[test]
    fn existing_output_is_rejected_without_overwrite() {
        let dir = std::env::temp_dir().join(format!("gpucap_ffmpeg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let out = dir.join("exists.mp4");
        std::fs::write(&out, b"keep").unwrap();

        let err = transcode_to_mp4(&dir.join("in.gif"), &out, false).unwrap_err();
        assert!(err.to_string().contains("already exists"), "{err}");
        assert_eq!(std::fs::read(&out).unwrap(), b"keep");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
