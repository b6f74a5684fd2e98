// 口令加密: 分块 ChaCha20-Poly1305, 密钥由 Argon2 从口令派生
// 格式: DBFERRY1 | 16 字节 salt | 7 字节 nonce 前缀 | 密文块 (每块明文 64KiB, 附 16 字节 tag)

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use argon2::Argon2;
use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::stream::{DecryptorBE32, EncryptorBE32};
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"DBFERRY1";
pub const SALT_SIZE: usize = 16;
pub const CHUNK_SIZE: usize = 64 * 1024;
const NONCE_PREFIX_SIZE: usize = 7;
const TAG_SIZE: usize = 16;
const HEADER_SIZE: usize = 8 + SALT_SIZE + NONCE_PREFIX_SIZE;
const BLOCK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

fn derive_key(salt: &[u8], passphrase: &str) -> Result<Key> {
    let mut key = Key::default();
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, key.as_mut_slice())
        .map_err(|e| Error::Crypto(format!("key derivation failed: {}", e)))?;
    Ok(key)
}

fn corrupted() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "decryption failed (wrong passphrase or corrupted data)",
    )
}

// 加密写入, 必须调用 finish 写出最后一块
pub struct SealWriter<W: Write> {
    inner: W,
    encryptor: Option<EncryptorBE32<ChaCha20Poly1305>>,
    buf: Vec<u8>,
}

impl<W: Write> SealWriter<W> {
    pub fn new(mut inner: W, passphrase: &str) -> Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        let mut prefix = [0u8; NONCE_PREFIX_SIZE];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut prefix);

        let cipher = ChaCha20Poly1305::new(&derive_key(&salt, passphrase)?);
        inner.write_all(MAGIC)?;
        inner.write_all(&salt)?;
        inner.write_all(&prefix)?;
        Ok(SealWriter {
            inner,
            encryptor: Some(EncryptorBE32::from_aead(cipher, GenericArray::from_slice(&prefix))),
            buf: Vec::with_capacity(CHUNK_SIZE),
        })
    }

    pub fn finish(mut self) -> io::Result<W> {
        let encryptor = self
            .encryptor
            .take()
            .ok_or_else(|| io::Error::other("sealed stream already finished"))?;
        let block = encryptor
            .encrypt_last(self.buf.as_slice())
            .map_err(|_| io::Error::other("encryption failed"))?;
        self.inner.write_all(&block)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for SealWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = (CHUNK_SIZE - self.buf.len()).min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() == CHUNK_SIZE {
            let encryptor = self
                .encryptor
                .as_mut()
                .ok_or_else(|| io::Error::other("sealed stream already finished"))?;
            let block = encryptor
                .encrypt_next(self.buf.as_slice())
                .map_err(|_| io::Error::other("encryption failed"))?;
            self.inner.write_all(&block)?;
            self.buf.clear();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// 解密读取; 截断或篡改的数据在读取时报 InvalidData
pub struct OpenReader<R: Read> {
    inner: R,
    decryptor: Option<DecryptorBE32<ChaCha20Poly1305>>,
    pending: Vec<u8>,
    plain: Vec<u8>,
    pos: usize,
}

impl<R: Read> OpenReader<R> {
    pub fn new(mut inner: R, passphrase: &str) -> Result<Self> {
        let mut header = [0u8; HEADER_SIZE];
        inner
            .read_exact(&mut header)
            .map_err(|_| Error::Crypto("sealed data too short".to_string()))?;
        if !is_sealed(&header) {
            return Err(Error::Crypto("missing DBFERRY1 header".to_string()));
        }
        let salt = &header[8..8 + SALT_SIZE];
        let prefix = &header[8 + SALT_SIZE..];
        let cipher = ChaCha20Poly1305::new(&derive_key(salt, passphrase)?);
        Ok(OpenReader {
            inner,
            decryptor: Some(DecryptorBE32::from_aead(cipher, GenericArray::from_slice(prefix))),
            pending: Vec::with_capacity(BLOCK_SIZE + 1),
            plain: Vec::new(),
            pos: 0,
        })
    }

    // 多读一个字节才能判断当前块是否为最后一块
    fn next_block(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 8192];
        while self.pending.len() <= BLOCK_SIZE {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.pending.extend_from_slice(&chunk[..n]);
        }

        self.pos = 0;
        if self.pending.len() > BLOCK_SIZE {
            let rest = self.pending.split_off(BLOCK_SIZE);
            let block = std::mem::replace(&mut self.pending, rest);
            let decryptor = self.decryptor.as_mut().ok_or_else(corrupted)?;
            self.plain = decryptor
                .decrypt_next(block.as_slice())
                .map_err(|_| corrupted())?;
        } else {
            let decryptor = self.decryptor.take().ok_or_else(corrupted)?;
            let block = std::mem::take(&mut self.pending);
            self.plain = decryptor
                .decrypt_last(block.as_slice())
                .map_err(|_| corrupted())?;
        }
        Ok(())
    }
}

impl<R: Read> Read for OpenReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.plain.len() {
            if self.decryptor.is_none() {
                return Ok(0);
            }
            self.next_block()?;
        }
        let n = (self.plain.len() - self.pos).min(out.len());
        out[..n].copy_from_slice(&self.plain[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub fn seal(passphrase: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut writer = SealWriter::new(Vec::new(), passphrase)?;
    writer.write_all(plaintext)?;
    Ok(writer.finish()?)
}

pub fn open(passphrase: &str, sealed: &[u8]) -> Result<Vec<u8>> {
    let mut reader = OpenReader::new(sealed, passphrase)?;
    let mut plain = Vec::new();
    reader
        .read_to_end(&mut plain)
        .map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(plain)
}

pub fn is_sealed(data: &[u8]) -> bool {
    data.len() >= MAGIC.len() && &data[..MAGIC.len()] == MAGIC
}

// 边写边算 sha256
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        HashingWriter {
            inner,
            hasher: Sha256::new(),
        }
    }

    pub fn finish(self) -> (W, String) {
        (self.inner, hex::encode(self.hasher.finalize()))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(data)?;
        self.hasher.update(&data[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_data_opens_with_same_passphrase() {
        let sealed = seal("correct horse", b"host = \"db1\"").unwrap();
        assert!(is_sealed(&sealed));
        assert_eq!(sealed.len(), HEADER_SIZE + 12 + TAG_SIZE);
        assert_eq!(open("correct horse", &sealed).unwrap(), b"host = \"db1\"");
    }

    #[test]
    fn multi_chunk_stream_reads_back() {
        let data: Vec<u8> = (0..CHUNK_SIZE * 2 + 123).map(|i| (i % 251) as u8).collect();
        let sealed = seal("pw", &data).unwrap();
        assert_eq!(sealed.len(), HEADER_SIZE + data.len() + 3 * TAG_SIZE);
        assert_eq!(open("pw", &sealed).unwrap(), data);

        // 恰好整块时最后一块为空
        let exact = vec![7u8; CHUNK_SIZE];
        assert_eq!(open("pw", &seal("pw", &exact).unwrap()).unwrap(), exact);
        assert_eq!(open("pw", &seal("pw", b"").unwrap()).unwrap(), b"");
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let sealed = seal("one", b"secret").unwrap();
        assert!(matches!(open("two", &sealed), Err(Error::Crypto(_))));
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let data = vec![1u8; CHUNK_SIZE + 10];
        let sealed = seal("k", &data).unwrap();
        // 去掉最后一块: 剩下的整块不是最后一块, 不能通过校验
        assert!(open("k", &sealed[..HEADER_SIZE + BLOCK_SIZE]).is_err());
    }

    #[test]
    fn tampered_or_foreign_data_is_rejected() {
        let mut sealed = seal("k", b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(open("k", &sealed).is_err());
        assert!(open("k", b"plain text that is long enough to pass the size check").is_err());
        assert!(open("k", b"short").is_err());
    }

    #[test]
    fn salt_makes_every_seal_different() {
        assert_ne!(seal("k", b"same").unwrap(), seal("k", b"same").unwrap());
    }

    #[test]
    fn hashing_writer_matches_one_shot_digest() {
        let mut w = HashingWriter::new(Vec::new());
        w.write_all(b"abc").unwrap();
        w.write_all(b"def").unwrap();
        let (inner, digest) = w.finish();
        assert_eq!(inner, b"abcdef");
        assert_eq!(digest, sha256_hex(b"abcdef"));
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
