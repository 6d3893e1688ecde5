//! Error surface of the virtual filesystem core.
//!
//! Components raise tagged variants; only the FUSE adapter turns them into
//! POSIX errnos. Upstream (RPC) and backend (SQLite) failures are folded in
//! at the component boundary so they never cross a syscall callback as a
//! panic.

use std::fmt;

use thiserror::Error;

use crate::cache::CacheError;
use crate::tg::client::ClientError;

#[derive(Debug, Clone, Default)]
pub struct PathHint(Option<String>);

impl PathHint {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn some(path: impl Into<String>) -> Self {
        Self(Some(path.into()))
    }
}

impl fmt::Display for PathHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(path) if !path.is_empty() => write!(f, ": {path}"),
            _ => Ok(()),
        }
    }
}

impl From<&str> for PathHint {
    fn from(value: &str) -> Self {
        Self::some(value)
    }
}

impl From<String> for PathHint {
    fn from(value: String) -> Self {
        Self::some(value)
    }
}

#[derive(Debug, Error)]
pub enum VfsError {
    #[error("not found{path}")]
    NotFound { path: PathHint },

    #[error("not a directory{path}")]
    NotADirectory { path: PathHint },

    #[error("is a directory{path}")]
    IsADirectory { path: PathHint },

    #[error("permission denied{path}")]
    PermissionDenied { path: PathHint },

    #[error("operation not permitted{path}")]
    NotPermitted { path: PathHint },

    #[error("file too large{path}")]
    FileTooLarge { path: PathHint },

    #[error("invalid argument{path}")]
    InvalidInput { path: PathHint },

    #[error("binary data rejected{path}")]
    BinaryData { path: PathHint },

    #[error("upstream error: {0}")]
    Upstream(#[from] ClientError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl VfsError {
    pub fn not_found(path: impl Into<PathHint>) -> Self {
        VfsError::NotFound { path: path.into() }
    }

    pub fn not_a_directory(path: impl Into<PathHint>) -> Self {
        VfsError::NotADirectory { path: path.into() }
    }

    pub fn is_a_directory(path: impl Into<PathHint>) -> Self {
        VfsError::IsADirectory { path: path.into() }
    }

    pub fn permission_denied(path: impl Into<PathHint>) -> Self {
        VfsError::PermissionDenied { path: path.into() }
    }

    pub fn not_permitted(path: impl Into<PathHint>) -> Self {
        VfsError::NotPermitted { path: path.into() }
    }

    pub fn file_too_large(path: impl Into<PathHint>) -> Self {
        VfsError::FileTooLarge { path: path.into() }
    }

    pub fn invalid_input(path: impl Into<PathHint>) -> Self {
        VfsError::InvalidInput { path: path.into() }
    }

    pub fn binary_data(path: impl Into<PathHint>) -> Self {
        VfsError::BinaryData { path: path.into() }
    }

    /// The errno the kernel should see for this error.
    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound { .. } => libc::ENOENT,
            VfsError::NotADirectory { .. } => libc::ENOTDIR,
            VfsError::IsADirectory { .. } => libc::EISDIR,
            VfsError::PermissionDenied { .. } => libc::EACCES,
            VfsError::NotPermitted { .. } => libc::EPERM,
            VfsError::FileTooLarge { .. } => libc::EFBIG,
            VfsError::InvalidInput { .. } => libc::EINVAL,
            VfsError::BinaryData { .. } => libc::EIO,
            VfsError::Upstream(_) | VfsError::Cache(_) | VfsError::Io(_) => libc::EIO,
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_follows_the_taxonomy() {
        assert_eq!(VfsError::not_found("/x").errno(), libc::ENOENT);
        assert_eq!(VfsError::not_a_directory("/x").errno(), libc::ENOTDIR);
        assert_eq!(VfsError::is_a_directory("/x").errno(), libc::EISDIR);
        assert_eq!(VfsError::permission_denied("/x").errno(), libc::EACCES);
        assert_eq!(VfsError::not_permitted("/x").errno(), libc::EPERM);
        assert_eq!(VfsError::file_too_large("/x").errno(), libc::EFBIG);
        assert_eq!(VfsError::invalid_input("/x").errno(), libc::EINVAL);
        assert_eq!(VfsError::binary_data("/x").errno(), libc::EIO);
        assert_eq!(
            VfsError::Upstream(ClientError::Network("down".into())).errno(),
            libc::EIO
        );
    }

    #[test]
    fn messages_carry_the_path_hint() {
        let err = VfsError::not_found("/users/alice");
        assert_eq!(err.to_string(), "not found: /users/alice");
        let bare = VfsError::NotFound { path: PathHint::none() };
        assert_eq!(bare.to_string(), "not found");
    }
}
