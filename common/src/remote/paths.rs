// Platform path to remote SFTP path conversion

const DISTRICTS_MARKER: &str = "districts/";
const FTPROOT_MARKER: &str = "ftproot/";

/// Convert a Windows-style path stored by the platform into an absolute SFTP path
///
/// `F:\FTProot\Districts\7\SAT` becomes `/Districts/7/SAT`. Applying the
/// conversion to its own output returns the same value.
pub fn to_remote_path(db_path: &str) -> String {
    let mut p = db_path.trim().replace('\\', "/");
    while p.contains("//") {
        p = p.replace("//", "/");
    }

    let mut rest = p.as_str();
    let mut chars = rest.chars();
    if let (Some(drive), Some(':')) = (chars.next(), chars.next()) {
        if drive.is_ascii_alphabetic() {
            rest = &rest[2..];
        }
    }
    rest = rest.trim_start_matches('/');

    // ASCII lowering keeps byte offsets aligned with `rest`
    let lower = rest.to_ascii_lowercase();
    if let Some(idx) = lower.find(DISTRICTS_MARKER) {
        rest = &rest[idx..];
    } else if let Some(idx) = lower.rfind(FTPROOT_MARKER) {
        rest = rest[idx + FTPROOT_MARKER.len()..].trim_start_matches('/');
    }

    format!("/{}", rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_backslash_path() {
        assert_eq!(
            to_remote_path(r"F:\FTProot\Districts\7\SAT"),
            "/Districts/7/SAT"
        );
    }

    #[test]
    fn test_forward_slash_and_mixed_case() {
        assert_eq!(
            to_remote_path("f:/ftproot/DISTRICTS/12/psat/"),
            "/DISTRICTS/12/psat/"
        );
        assert_eq!(
            to_remote_path(r"  F:\\FTProot\\Districts\\\\3\\x.csv "),
            "/Districts/3/x.csv"
        );
    }

    #[test]
    fn test_ftproot_fallback() {
        assert_eq!(to_remote_path(r"D:\FTProot\Uploads\9"), "/Uploads/9");
        assert_eq!(to_remote_path("/a/FTProot/b/ftproot/c"), "/c");
    }

    #[test]
    fn test_unmarked_paths_become_absolute() {
        assert_eq!(to_remote_path("some/dir"), "/some/dir");
        assert_eq!(to_remote_path(""), "/");
        assert_eq!(to_remote_path(r"C:\"), "/");
    }

    #[test]
    fn test_non_alphabetic_drive_is_kept() {
        assert_eq!(to_remote_path("1:/data"), "/1:/data");
    }

    #[test]
    fn test_idempotent_on_examples() {
        for input in [
            r"F:\FTProot\Districts\7\SAT",
            r"D:\FTProot\Uploads\9",
            "x//y",
            "/:x",
        ] {
            let once = to_remote_path(input);
            assert_eq!(to_remote_path(&once), once, "input {:?}", input);
        }
    }
}
