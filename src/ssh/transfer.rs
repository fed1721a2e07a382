// ABOUTME: Helpers for the external secure-copy invocation.
// ABOUTME: Tool lookup, key permission restriction, and argument construction.

use super::error::{Error, Result};
use super::retry::TransferDirection;
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub(crate) const TRANSFER_TOOL: &str = "scp";

/// Locate the secure-copy executable on the process search path.
pub(crate) fn locate_tool() -> Result<PathBuf> {
    which::which(TRANSFER_TOOL).map_err(|source| Error::ToolLookup {
        tool: TRANSFER_TOOL.to_string(),
        source,
    })
}

/// Restrict the key file to owner-read-only. Secure-copy tools refuse key
/// material that is group- or world-readable.
pub(crate) fn restrict_key_permissions(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(0o400)).map_err(|source| {
        Error::KeyPermissions {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Build the tool's argument list. Source precedes destination:
/// local then remote for a send, remote then local for a download.
pub(crate) fn transfer_args(
    direction: TransferDirection,
    key_path: &Path,
    user: &str,
    target: &str,
    local: &Path,
    remote: &str,
) -> Vec<OsString> {
    let remote_arg: OsString = format!("{user}@{target}:{remote}").into();
    let mut args: Vec<OsString> = vec![
        "-oStrictHostKeyChecking=no".into(),
        "-i".into(),
        key_path.as_os_str().to_os_string(),
    ];
    match direction {
        TransferDirection::Send => {
            args.push(local.as_os_str().to_os_string());
            args.push(remote_arg);
        }
        TransferDirection::Download => {
            args.push(remote_arg);
            args.push(local.as_os_str().to_os_string());
        }
    }
    args
}

/// Fold the tool's stdout and stderr into one buffer, stdout first.
pub(crate) fn combined_output(output: std::process::Output) -> Vec<u8> {
    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    combined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_orders_local_before_remote() {
        let args = transfer_args(
            TransferDirection::Send,
            Path::new("/tmp/test.key"),
            "ec2-user",
            "ec2-1-2-3-4.compute.amazonaws.com",
            Path::new("/tmp/artifact.tgz"),
            "/home/ec2-user/artifact.tgz",
        );

        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-oStrictHostKeyChecking=no",
                "-i",
                "/tmp/test.key",
                "/tmp/artifact.tgz",
                "ec2-user@ec2-1-2-3-4.compute.amazonaws.com:/home/ec2-user/artifact.tgz",
            ]
        );
    }

    #[test]
    fn download_orders_remote_before_local() {
        let args = transfer_args(
            TransferDirection::Download,
            Path::new("/tmp/test.key"),
            "ubuntu",
            "203.0.113.7",
            Path::new("/tmp/report.txt"),
            "/var/log/report.txt",
        );

        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-oStrictHostKeyChecking=no",
                "-i",
                "/tmp/test.key",
                "ubuntu@203.0.113.7:/var/log/report.txt",
                "/tmp/report.txt",
            ]
        );
    }

    #[test]
    fn key_permissions_become_owner_read_only() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        restrict_key_permissions(file.path()).expect("chmod should succeed");

        let mode = fs::metadata(file.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o400);
    }

    #[test]
    fn key_permissions_failure_is_reported() {
        let err = restrict_key_permissions(Path::new("/nonexistent/drover.key"))
            .expect_err("chmod of a missing file should fail");
        assert!(matches!(err, Error::KeyPermissions { .. }));
    }

    #[test]
    fn combined_output_is_stdout_then_stderr() {
        use std::os::unix::process::ExitStatusExt;

        let output = std::process::Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: b"sent 100 bytes\n".to_vec(),
            stderr: b"warning: slow link\n".to_vec(),
        };
        assert_eq!(
            combined_output(output),
            b"sent 100 bytes\nwarning: slow link\n".to_vec()
        );
    }

    #[test]
    fn lookup_failure_names_the_tool() {
        temp_env::with_var("PATH", Some(""), || {
            let err = locate_tool().expect_err("lookup should fail with empty PATH");
            match err {
                Error::ToolLookup { tool, .. } => assert_eq!(tool, TRANSFER_TOOL),
                other => panic!("expected ToolLookup, got: {other:?}"),
            }
        });
    }
}
