//! Utility functions for nfsshare

use std::borrow::Cow;

/// Characters that never need quoting in a POSIX shell word
fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | ':' | ',' | '=' | '+' | '@')
}

/// Quote a word for `sh -c`, leaving plain paths untouched.
pub fn shell_quote(word: &str) -> Cow<'_, str> {
    if !word.is_empty() && word.chars().all(is_shell_safe) {
        return Cow::Borrowed(word);
    }
    Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
}

/// Validate an absolute path that will be written into fstab/exports.
pub fn validate_share_path(what: &str, path: &str) -> crate::Result<()> {
    if path.is_empty() {
        return Err(crate::Error::InvalidConfig(format!("{} cannot be empty", what)));
    }

    if !path.starts_with('/') {
        return Err(crate::Error::InvalidConfig(format!(
            "{} must be absolute: {}",
            what, path
        )));
    }

    // fstab and exports are whitespace separated
    if path.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(crate::Error::InvalidConfig(format!(
            "{} contains whitespace: {:?}",
            what, path
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote_plain() {
        assert_eq!(shell_quote("/data"), "/data");
        assert_eq!(shell_quote("master:/data"), "master:/data");
    }

    #[test]
    fn test_shell_quote_special() {
        assert_eq!(shell_quote("/my data"), "'/my data'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_validate_share_path() {
        assert!(validate_share_path("server_path", "/mnt").is_ok());
        assert!(validate_share_path("server_path", "").is_err());
        assert!(validate_share_path("server_path", "mnt").is_err());
        assert!(validate_share_path("client_path", "/my share").is_err());
    }
}
