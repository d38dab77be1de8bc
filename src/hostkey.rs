//! Persistence for the node's SSH host key: one Ed25519 key, stored at
//! `<data_dir>/ssh_host_ed25519_key` in OpenSSH PEM format with mode 0600.
//! Generated on first run, reused afterward.
//!
//! The actual SSH server and its JWT verifier are out of scope for this
//! crate (see the purpose/scope section); this module only owns the key
//! material the tunnel manager's listener identifies itself with.

use std::path::Path;

use ed25519_dalek::SigningKey;
use rand::RngCore;
use thiserror::Error;

const HOST_KEY_FILE_NAME: &str = "ssh_host_ed25519_key";
const OPENSSH_MAGIC: &[u8] = b"openssh-key-v1\0";
const KEY_TYPE: &[u8] = b"ssh-ed25519";

#[derive(Debug, Error)]
pub enum HostKeyError {
    #[error("failed to read host key file: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write host key file: {0}")]
    Write(#[source] std::io::Error),

    #[error("host key file is not valid PEM: {0}")]
    Pem(#[from] pem::PemError),

    #[error("host key blob is malformed: {0}")]
    Malformed(&'static str),

    #[error("unsupported cipher {0:?}; only unencrypted keys are supported")]
    UnsupportedCipher(String),

    #[error("key checkints do not match, key is corrupt")]
    CheckintMismatch,
}

pub fn host_key_path(data_dir: &Path) -> std::path::PathBuf {
    data_dir.join(HOST_KEY_FILE_NAME)
}

/// Loads the node's SSH host key from `data_dir`, generating and persisting
/// a fresh one (mode 0600) if absent.
pub fn load_or_generate(data_dir: &Path) -> Result<SigningKey, HostKeyError> {
    let path = host_key_path(data_dir);
    if path.exists() {
        let pem_text = std::fs::read_to_string(&path).map_err(HostKeyError::Read)?;
        return decode(&pem_text);
    }

    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    let signing_key = SigningKey::from_bytes(&seed);
    let pem_text = encode(&signing_key, "");
    write_private(&path, &pem_text)?;
    Ok(signing_key)
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> Result<(), HostKeyError> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .map_err(HostKeyError::Write)?;
    file.write_all(contents.as_bytes()).map_err(HostKeyError::Write)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> Result<(), HostKeyError> {
    std::fs::write(path, contents).map_err(HostKeyError::Write)
}

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

fn write_string(buf: &mut Vec<u8>, data: &[u8]) {
    write_u32(buf, data.len() as u32);
    buf.extend_from_slice(data);
}

fn encode_public_blob(public_key: &[u8; 32]) -> Vec<u8> {
    let mut blob = Vec::new();
    write_string(&mut blob, KEY_TYPE);
    write_string(&mut blob, public_key);
    blob
}

fn encode(signing_key: &SigningKey, comment: &str) -> String {
    let seed = signing_key.to_bytes();
    let public_key = signing_key.verifying_key().to_bytes();

    let mut body = Vec::new();
    body.extend_from_slice(OPENSSH_MAGIC);
    write_string(&mut body, b"none"); // cipher
    write_string(&mut body, b"none"); // kdf
    write_string(&mut body, b""); // kdf options
    write_u32(&mut body, 1); // number of keys

    write_string(&mut body, &encode_public_blob(&public_key));

    let mut private_section = Vec::new();
    let mut checkint_bytes = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut checkint_bytes);
    private_section.extend_from_slice(&checkint_bytes);
    private_section.extend_from_slice(&checkint_bytes);
    write_string(&mut private_section, KEY_TYPE);
    write_string(&mut private_section, &public_key);

    let mut secret_blob = Vec::with_capacity(64);
    secret_blob.extend_from_slice(&seed);
    secret_blob.extend_from_slice(&public_key);
    write_string(&mut private_section, &secret_blob);
    write_string(&mut private_section, comment.as_bytes());

    let mut pad = 1u8;
    while private_section.len() % 8 != 0 {
        private_section.push(pad);
        pad = pad.wrapping_add(1);
    }
    write_string(&mut body, &private_section);

    let pem = pem::Pem::new("OPENSSH PRIVATE KEY", body);
    pem::encode(&pem)
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], HostKeyError> {
        if self.pos + n > self.data.len() {
            return Err(HostKeyError::Malformed("unexpected end of key blob"));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, HostKeyError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().expect("length checked above")))
    }

    fn read_string(&mut self) -> Result<&'a [u8], HostKeyError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }
}

fn decode(pem_text: &str) -> Result<SigningKey, HostKeyError> {
    let pem = pem::parse(pem_text)?;
    let mut cursor = Cursor::new(pem.contents());

    let magic = cursor.read_bytes(OPENSSH_MAGIC.len())?;
    if magic != OPENSSH_MAGIC {
        return Err(HostKeyError::Malformed("missing openssh-key-v1 magic"));
    }

    let cipher = cursor.read_string()?;
    if cipher != b"none" {
        return Err(HostKeyError::UnsupportedCipher(String::from_utf8_lossy(cipher).into_owned()));
    }
    let kdf = cursor.read_string()?;
    if kdf != b"none" {
        return Err(HostKeyError::UnsupportedCipher("kdf != none".to_string()));
    }
    let _kdf_options = cursor.read_string()?;

    let n_keys = cursor.read_u32()?;
    if n_keys != 1 {
        return Err(HostKeyError::Malformed("expected exactly one key"));
    }

    let _public_blob = cursor.read_string()?;
    let private_section = cursor.read_string()?;

    let mut inner = Cursor::new(private_section);
    let checkint1 = inner.read_u32()?;
    let checkint2 = inner.read_u32()?;
    if checkint1 != checkint2 {
        return Err(HostKeyError::CheckintMismatch);
    }

    let key_type = inner.read_string()?;
    if key_type != KEY_TYPE {
        return Err(HostKeyError::Malformed("only ssh-ed25519 host keys are supported"));
    }
    let _public_key = inner.read_string()?;
    let secret_blob = inner.read_string()?;
    if secret_blob.len() != 64 {
        return Err(HostKeyError::Malformed("ed25519 secret blob must be 64 bytes"));
    }
    let seed: [u8; 32] = secret_blob[..32].try_into().expect("length checked above");

    Ok(SigningKey::from_bytes(&seed))
}
