//! Vault key codec.
//!
//! A key addresses a hardlink inside a branch by the source file's inode
//! and its path relative to the vault root. The inode is rendered as
//! zero-padded hexadecimal and split into byte pairs: all but the least
//! significant pair become nested directories and the last pair prefixes
//! the leaf name, followed by the base64 encoding of the relative path.
//! This gives O(1) lookup by inode, keeps directories small and carries
//! enough information to recover from renames.
//!
//! Encodings longer than the target filesystem's name limit are split into
//! chunks, with all but the last chunk promoted to directory levels below
//! the least-significant-byte directory. The filename-safe base64 alphabet
//! is used so that no chunk can contain a path separator; the `-` after the
//! hex prefix is always the first `-` in the joined key, so decoding stays
//! unambiguous.

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt as _, OsStringExt as _};
use std::path::{Component, Path, PathBuf};

use data_encoding::BASE64URL;

use crate::error::{Error, Result};

const DELIMITER: char = '-';

/// Room reserved for the `XX-` leaf prefix when chunking long encodings.
const PREFIX_RESERVE: usize = 3;

/// The hexadecimal byte pairs of an inode, most significant first.
fn inode_chunks(inode: u64) -> Vec<String> {
    let mut hex = format!("{inode:x}");
    if hex.len() % 2 == 1 {
        hex.insert(0, '0');
    }

    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect()
}

/// A vault file key: the bidirectional mapping between an (inode, relative
/// source path) pair and the hardlink path inside a branch.
///
/// Two keys compare equal iff their (inode, source) pairs do; the on-disk
/// layout may differ when the keys were built against different filesystem
/// name limits.
#[derive(Debug, Clone)]
pub struct VaultKey {
    inode: u64,
    source: PathBuf,
    path: PathBuf,
}

impl PartialEq for VaultKey {
    fn eq(&self, rhs: &Self) -> bool {
        self.inode == rhs.inode && self.source == rhs.source
    }
}

impl Eq for VaultKey {}

impl VaultKey {
    /// Construct the key for `source` (relative to the vault root) with
    /// the given inode. `max_name_len` is the target filesystem's filename
    /// limit, as reported by [`crate::fs::name_max`].
    pub fn new(inode: u64, source: &Path, max_name_len: usize) -> VaultKey {
        let chunks = inode_chunks(inode);
        let (dirs, lsb) = chunks.split_at(chunks.len() - 1);

        let mut path = PathBuf::new();
        for dir in dirs {
            path.push(dir);
        }

        let encoded = BASE64URL.encode(source.as_os_str().as_bytes());
        let chunk_len = max_name_len.saturating_sub(PREFIX_RESERVE).max(1);
        let mut pieces = encoded
            .as_bytes()
            .chunks(chunk_len)
            .map(|c| String::from_utf8_lossy(c).into_owned());

        let head = pieces.next().unwrap_or_default();
        path.push(format!("{}{}{}", lsb[0], DELIMITER, head));
        for piece in pieces {
            path.push(piece);
        }

        VaultKey {
            inode,
            source: source.to_path_buf(),
            path,
        }
    }

    /// Reconstruct a key from its path relative to a branch directory.
    pub fn decode(key_path: &Path) -> Result<VaultKey> {
        let mut joined = String::new();
        for component in key_path.components() {
            match component {
                Component::Normal(part) => {
                    joined.push_str(part.to_str().ok_or_else(|| {
                        Error::MalformedKey(format!("{} is not valid UTF-8", key_path.display()))
                    })?);
                }
                _ => {
                    return Err(Error::MalformedKey(format!(
                        "{} is not a relative key path",
                        key_path.display()
                    )));
                }
            }
        }

        let (hex, encoded) = joined.split_once(DELIMITER).ok_or_else(|| {
            Error::MalformedKey(format!("no delimiter in {}", key_path.display()))
        })?;

        let inode = u64::from_str_radix(hex, 16).map_err(|_| {
            Error::MalformedKey(format!("non-hexadecimal inode in {}", key_path.display()))
        })?;

        let bytes = BASE64URL.decode(encoded.as_bytes()).map_err(|_| {
            Error::MalformedKey(format!("undecodable path in {}", key_path.display()))
        })?;

        Ok(VaultKey {
            inode,
            source: PathBuf::from(OsString::from_vec(bytes)),
            path: key_path.to_path_buf(),
        })
    }

    pub fn inode(&self) -> u64 {
        self.inode
    }

    /// The source path, relative to the vault root.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// The key path, relative to a branch directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory prefix and `XX-` leaf prefix shared by every key of
    /// the given inode, used to find entries whose source has been renamed.
    pub fn inode_prefix(inode: u64) -> (Option<PathBuf>, String) {
        let chunks = inode_chunks(inode);
        let (dirs, lsb) = chunks.split_at(chunks.len() - 1);

        let prefix = if dirs.is_empty() {
            None
        } else {
            Some(dirs.iter().collect())
        };

        (prefix, format!("{}{}", lsb[0], DELIMITER))
    }

    /// [`VaultKey::inode_prefix`] for this key's inode.
    pub fn search_prefix(&self) -> (Option<PathBuf>, String) {
        Self::inode_prefix(self.inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const NAME_MAX: usize = 255;

    #[test]
    fn test_roundtrip() {
        let key = VaultKey::new(0x1234_5678, Path::new("some/deep/file.txt"), NAME_MAX);
        let decoded = VaultKey::decode(key.path()).unwrap();
        assert_eq!(decoded.inode(), 0x1234_5678);
        assert_eq!(decoded.source(), Path::new("some/deep/file.txt"));
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_hierarchy_shape() {
        // 0x12345678 -> 12/34/56/78-<base64>
        let key = VaultKey::new(0x1234_5678, Path::new("f"), NAME_MAX);
        let components: Vec<_> = key
            .path()
            .components()
            .map(|c| c.as_os_str().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(components.len(), 4);
        assert_eq!(components[0], "12");
        assert_eq!(components[1], "34");
        assert_eq!(components[2], "56");
        assert!(components[3].starts_with("78-"));
    }

    #[test]
    fn test_small_inode_is_zero_padded() {
        let key = VaultKey::new(0xabc, Path::new("f"), NAME_MAX);
        let components: Vec<_> = key.path().components().collect();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].as_os_str(), "0a");
        let decoded = VaultKey::decode(key.path()).unwrap();
        assert_eq!(decoded.inode(), 0xabc);
    }

    #[test]
    fn test_long_path_is_chunked() {
        let long: PathBuf = format!("dir/{}", "x".repeat(600)).into();
        let key = VaultKey::new(42, &long, 64);

        // Every component must respect the name limit
        for component in key.path().components() {
            assert!(component.as_os_str().len() <= 64);
        }
        assert!(key.path().components().count() > 2);

        let decoded = VaultKey::decode(key.path()).unwrap();
        assert_eq!(decoded.source(), long.as_path());
        assert_eq!(decoded.inode(), 42);
    }

    #[test]
    fn test_equality_ignores_chunking() {
        let source = Path::new("a/rather/long/relative/path/to/a/file");
        let wide = VaultKey::new(7, source, 255);
        let narrow = VaultKey::new(7, source, 16);
        assert_eq!(wide, narrow);
        assert_ne!(wide.path(), narrow.path());
    }

    #[test]
    fn test_inode_prefix() {
        let (prefix, leaf) = VaultKey::inode_prefix(0x1234_5678);
        assert_eq!(prefix.as_deref(), Some(Path::new("12/34/56")));
        assert_eq!(leaf, "78-");

        let (prefix, leaf) = VaultKey::inode_prefix(0x7);
        assert_eq!(prefix, None);
        assert_eq!(leaf, "07-");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in ["nodelimiter", "zz-aGVsbG8=", "12-not!base64!"] {
            assert!(matches!(
                VaultKey::decode(Path::new(bad)),
                Err(Error::MalformedKey(_))
            ));
        }
    }

    proptest! {
        #[test]
        fn prop_roundtrip(
            inode in any::<u64>(),
            parts in proptest::collection::vec("[a-zA-Z0-9 ._]{1,40}", 1..8),
            name_max in 8usize..256,
        ) {
            let source: PathBuf = parts.iter().collect();
            let key = VaultKey::new(inode, &source, name_max);

            for component in key.path().components() {
                prop_assert!(component.as_os_str().len() <= name_max);
            }

            let decoded = VaultKey::decode(key.path()).unwrap();
            prop_assert_eq!(decoded.inode(), inode);
            prop_assert_eq!(decoded.source(), source.as_path());
        }
    }
}
