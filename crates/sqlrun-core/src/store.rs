use std::{
    fs, io,
    path::{Path, PathBuf},
};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use thiserror::Error;

use crate::{DataSource, sources_db};

const ENCRYPTION_KEY: [u8; 32] = [
    0x3a, 0x91, 0x5e, 0xc7, 0x02, 0xd8, 0x6b, 0x14, 0xf3, 0x8c, 0x27, 0xa0, 0x59, 0xe6, 0x1b, 0x72, 0xcd, 0x40, 0x95,
    0x0e, 0xb7, 0x63, 0x2f, 0xda, 0x88, 0x15, 0x4c, 0xf1, 0x7a, 0x06, 0xbe, 0x39,
];

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}

/// 已保存的数据源
///
/// 文件格式：12 字节随机 nonce + AES-256-GCM 加密后的 JSON 数组。
pub struct SourceStore {
    sources: Vec<DataSource>,
    path: PathBuf,
}

impl SourceStore {
    /// 打开默认位置（~/.sqlrun/sources.db）
    pub fn init() -> Result<Self, StoreError> {
        Self::open(sources_db())
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let sources = if path.exists() {
            let encrypted = fs::read(&path)?;
            let decrypted = Self::decrypt(&encrypted)?;
            serde_json::from_slice(&decrypted)?
        } else {
            vec![]
        };
        tracing::debug!("加载数据源 {} 个: {}", sources.len(), path.display());

        Ok(Self { sources, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sources(&self) -> &[DataSource] {
        &self.sources
    }

    pub fn find(
        &self,
        id: &str,
    ) -> Option<&DataSource> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// 按 id 新增或替换
    pub fn upsert(
        &mut self,
        source: DataSource,
    ) {
        match self.sources.iter_mut().find(|s| s.id == source.id) {
            Some(existing) => *existing = source,
            None => self.sources.push(source),
        }
    }

    pub fn remove(
        &mut self,
        id: &str,
    ) -> Option<DataSource> {
        let idx = self.sources.iter().position(|s| s.id == id)?;
        Some(self.sources.remove(idx))
    }

    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_vec(&self.sources)?;
        let encrypted = Self::encrypt(&json)?;
        fs::write(&self.path, encrypted)?;
        Ok(())
    }

    fn encrypt(data: &[u8]) -> Result<Vec<u8>, StoreError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = Aes256Gcm::new(&ENCRYPTION_KEY.into())
            .encrypt(&nonce, data)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(data: &[u8]) -> Result<Vec<u8>, StoreError> {
        if data.len() < NONCE_LEN {
            return Err(StoreError::Decryption("文件过短".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        Aes256Gcm::new(&ENCRYPTION_KEY.into())
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| StoreError::Decryption(e.to_string()))
    }
}
