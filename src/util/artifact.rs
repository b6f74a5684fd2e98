// 备份文件命名与读写管道
// 文件名: backup_<库名>_<YYYYmmdd_HHMMSS>.sql[.gz|.zst][.enc], 后缀按最长匹配剥离

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::{read::GzDecoder, write::GzEncoder};

use crate::error::{Error, Result};
use crate::util::crypto::{self, HashingWriter, OpenReader, SealWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactKind {
    pub compression: Compression,
    pub encrypted: bool,
}

impl ArtifactKind {
    pub fn suffix(&self) -> &'static str {
        match (self.compression, self.encrypted) {
            (Compression::None, false) => ".sql",
            (Compression::Gzip, false) => ".sql.gz",
            (Compression::Zstd, false) => ".sql.zst",
            (Compression::None, true) => ".sql.enc",
            (Compression::Gzip, true) => ".sql.gz.enc",
            (Compression::Zstd, true) => ".sql.zst.enc",
        }
    }
}

const SUFFIXES: [(&str, ArtifactKind); 6] = [
    (
        ".sql.gz.enc",
        ArtifactKind { compression: Compression::Gzip, encrypted: true },
    ),
    (
        ".sql.zst.enc",
        ArtifactKind { compression: Compression::Zstd, encrypted: true },
    ),
    (
        ".sql.enc",
        ArtifactKind { compression: Compression::None, encrypted: true },
    ),
    (
        ".sql.gz",
        ArtifactKind { compression: Compression::Gzip, encrypted: false },
    ),
    (
        ".sql.zst",
        ArtifactKind { compression: Compression::Zstd, encrypted: false },
    ),
    (
        ".sql",
        ArtifactKind { compression: Compression::None, encrypted: false },
    ),
];

pub const CHECKSUM_SUFFIX: &str = ".sha256";
const PARTIAL_SUFFIX: &str = ".partial";
const PREFIX: &str = "backup_";

pub fn split_artifact_name(file_name: &str) -> Option<(&str, ArtifactKind)> {
    let mut candidates: Vec<&(&str, ArtifactKind)> = SUFFIXES.iter().collect();
    candidates.sort_by_key(|(suffix, _)| std::cmp::Reverse(suffix.len()));
    candidates.into_iter().find_map(|(suffix, kind)| {
        file_name
            .strip_suffix(suffix)
            .filter(|stem| !stem.is_empty())
            .map(|stem| (stem, *kind))
    })
}

pub fn artifact_kind(path: &Path) -> Option<ArtifactKind> {
    let name = path.file_name()?.to_str()?;
    split_artifact_name(name).map(|(_, kind)| kind)
}

// 库名中的路径分隔符等字符编码为 %XX, 可还原
pub fn encode_database(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

pub fn decode_database(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = encoded.get(i + 1..i + 3)?;
            if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return None;
            }
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

pub fn artifact_file_name(database: &str, stamp: &str, kind: ArtifactKind) -> String {
    format!("{}{}_{}{}", PREFIX, encode_database(database), stamp, kind.suffix())
}

pub fn database_from_artifact(file_name: &str) -> Option<String> {
    let (stem, _) = split_artifact_name(file_name)?;
    let rest = stem.strip_prefix(PREFIX)?;
    // 去掉 _YYYYmmdd_HHMMSS
    if rest.len() <= 16 || !rest.is_char_boundary(rest.len() - 16) {
        return None;
    }
    let (db, stamp) = rest.split_at(rest.len() - 16);
    let b = stamp.as_bytes();
    let stamp_ok = b[0] == b'_'
        && b[1..9].iter().all(u8::is_ascii_digit)
        && b[9] == b'_'
        && b[10..].iter().all(u8::is_ascii_digit);
    if !stamp_ok {
        return None;
    }
    decode_database(db)
}

pub fn checksum_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(CHECKSUM_SUFFIX);
    PathBuf::from(name)
}

fn partial_path(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_os_string();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

type FileSink = HashingWriter<BufWriter<File>>;

enum Sealing {
    Plain(FileSink),
    Sealed(SealWriter<FileSink>),
}

impl Sealing {
    fn finish(self) -> io::Result<FileSink> {
        match self {
            Sealing::Plain(sink) => Ok(sink),
            Sealing::Sealed(sealed) => sealed.finish(),
        }
    }
}

impl Write for Sealing {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self {
            Sealing::Plain(w) => w.write(data),
            Sealing::Sealed(w) => w.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sealing::Plain(w) => w.flush(),
            Sealing::Sealed(w) => w.flush(),
        }
    }
}

enum Stage {
    Raw(Sealing),
    Gzip(GzEncoder<Sealing>),
}

// 写入 <name>.partial (gzip, 加密, sha256), finish 时改名到位
pub struct ArtifactWriter {
    stage: Stage,
    path: PathBuf,
    partial: PathBuf,
    checksum: bool,
}

impl ArtifactWriter {
    pub fn create(
        path: &Path,
        kind: ArtifactKind,
        passphrase: Option<&str>,
        checksum: bool,
    ) -> Result<Self> {
        if kind.compression == Compression::Zstd {
            return Err(Error::config("zstd artifacts are not supported"));
        }
        if path.exists() {
            return Err(Error::config(format!(
                "artifact {} already exists (another run writing to the same directory?)",
                path.display()
            )));
        }
        let passphrase = match (kind.encrypted, passphrase) {
            (true, None) => {
                return Err(Error::config(
                    "artifact encryption needs DBFERRY_BACKUP_PASSPHRASE",
                ));
            }
            (_, p) => p,
        };

        let partial = partial_path(path);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::config(format!(
                    "{} is being written by another run",
                    partial.display()
                )),
                _ => Error::Io(e),
            })?;
        let sink = HashingWriter::new(BufWriter::new(file));

        let sealing = match passphrase.filter(|_| kind.encrypted) {
            Some(p) => match SealWriter::new(sink, p) {
                Ok(w) => Sealing::Sealed(w),
                Err(e) => {
                    let _ = fs::remove_file(&partial);
                    return Err(e);
                }
            },
            None => Sealing::Plain(sink),
        };
        let stage = match kind.compression {
            Compression::Gzip => Stage::Gzip(GzEncoder::new(sealing, flate2::Compression::default())),
            _ => Stage::Raw(sealing),
        };
        Ok(ArtifactWriter {
            stage,
            path: path.to_path_buf(),
            partial,
            checksum,
        })
    }

    // 刷新各层, 写校验文件, 改名
    pub fn finish(self) -> Result<PathBuf> {
        let partial = self.partial.clone();
        let result = self.finish_stages();
        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }

    fn finish_stages(self) -> Result<PathBuf> {
        let sealing = match self.stage {
            Stage::Raw(s) => s,
            Stage::Gzip(gz) => gz.finish()?,
        };
        let (buffered, digest) = sealing.finish()?.finish();
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&self.partial, &self.path)?;
        if self.checksum {
            let file_name = self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            fs::write(checksum_path(&self.path), format!("{}  {}\n", digest, file_name))?;
        }
        Ok(self.path)
    }

    // 丢弃写了一半的文件
    pub fn abandon(self) {
        let partial = self.partial.clone();
        drop(self);
        let _ = fs::remove_file(partial);
    }
}

impl Write for ArtifactWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.stage {
            Stage::Raw(w) => w.write(data),
            Stage::Gzip(w) => w.write(data),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stage {
            Stage::Raw(w) => w.flush(),
            Stage::Gzip(w) => w.flush(),
        }
    }
}

pub fn verify_checksum(path: &Path) -> Result<()> {
    let sidecar = checksum_path(path);
    let recorded = fs::read_to_string(&sidecar).map_err(|e| {
        Error::config(format!("checksum file {} unavailable: {}", sidecar.display(), e))
    })?;
    let expected = recorded.split_whitespace().next().unwrap_or_default();
    let actual = crypto::sha256_file(path)?;
    if !expected.eq_ignore_ascii_case(&actual) {
        return Err(Error::config(format!(
            "checksum mismatch for {}: expected {}, got {}",
            path.display(),
            expected,
            actual
        )));
    }
    Ok(())
}

// 备份文件的明文 SQL 流: 解密后解压
pub fn open_reader(path: &Path, passphrase: Option<&str>) -> Result<Box<dyn Read + Send>> {
    let kind = artifact_kind(path).ok_or_else(|| {
        Error::config(format!("{} is not a recognised backup artifact", path.display()))
    })?;
    if kind.compression == Compression::Zstd {
        return Err(Error::config(format!(
            "{}: zstd artifacts are not supported",
            path.display()
        )));
    }
    let file = BufReader::new(File::open(path)?);
    let opened: Box<dyn Read + Send> = if kind.encrypted {
        let passphrase = passphrase.ok_or_else(|| {
            Error::config(format!(
                "{} is encrypted; set DBFERRY_BACKUP_PASSPHRASE",
                path.display()
            ))
        })?;
        Box::new(OpenReader::new(file, passphrase)?)
    } else {
        Box::new(file)
    };
    Ok(match kind.compression {
        Compression::Gzip => Box::new(GzDecoder::new(opened)),
        _ => opened,
    })
}
