use std::collections::{HashMap, VecDeque};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use tokio::sync::Mutex;
use url::Url;

use crate::{
    error::{AdaptiveError, AdaptiveResult},
    fetch::{ChunkType, Fetcher},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncryptionMethod {
    #[default]
    None,
    Aes128,
}

/// Encryption state attached to a segment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonEncryption {
    pub method: EncryptionMethod,
    pub key_url: Option<Url>,
    pub iv: Option<[u8; 16]>,
}

impl CommonEncryption {
    pub fn aes128(key_url: Url, iv: Option<[u8; 16]>) -> Self {
        Self {
            method: EncryptionMethod::Aes128,
            key_url: Some(key_url),
            iv,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.method != EncryptionMethod::None
    }

    /// The explicit IV, or the big-endian media sequence number when the playlist declares none
    /// (RFC 8216, section 5.2).
    pub fn iv_for(&self, sequence: u64) -> [u8; 16] {
        self.iv.unwrap_or_else(|| (sequence as u128).to_be_bytes())
    }
}

pub fn decrypt_aes128(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> AdaptiveResult<Vec<u8>> {
    let decryptor = cbc::Decryptor::<aes::Aes128>::new(key.into(), iv.into());
    Ok(decryptor.decrypt_padded_vec_mut::<Pkcs7>(data)?)
}

/// Session-wide AES key cache keyed by key URL.
///
/// The lock is held across lookup, fetch and insert, so concurrent callers asking for the same
/// key wait for the first fetch instead of issuing their own.
pub struct Keyring {
    inner: Mutex<KeyCache>,
    max_keys: usize,
}

#[derive(Default)]
struct KeyCache {
    keys: HashMap<Url, [u8; 16]>,
    order: VecDeque<Url>,
}

impl Keyring {
    pub fn new(max_keys: usize) -> Self {
        Self {
            inner: Mutex::new(KeyCache::default()),
            max_keys: max_keys.max(1),
        }
    }

    pub async fn get_key<F>(&self, fetcher: &F, url: &Url) -> AdaptiveResult<[u8; 16]>
    where
        F: Fetcher,
    {
        let mut cache = self.inner.lock().await;
        if let Some(key) = cache.keys.get(url) {
            return Ok(*key);
        }

        let body = fetcher.fetch(url, None, ChunkType::Key).await?;
        let key = parse_key(&body)?;
        log::debug!("Loaded key {url}");

        cache.keys.insert(url.clone(), key);
        cache.order.push_back(url.clone());
        while cache.order.len() > self.max_keys {
            if let Some(evicted) = cache.order.pop_front() {
                cache.keys.remove(&evicted);
            }
        }
        Ok(key)
    }

    pub async fn contains(&self, url: &Url) -> bool {
        self.inner.lock().await.keys.contains_key(url)
    }

    pub async fn invalidate(&self, url: &Url) {
        let mut cache = self.inner.lock().await;
        cache.keys.remove(url);
        cache.order.retain(|u| u != url);
    }

    pub async fn clear(&self) {
        let mut cache = self.inner.lock().await;
        cache.keys.clear();
        cache.order.clear();
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.keys.len()
    }
}

impl Default for Keyring {
    fn default() -> Self {
        Self::new(50)
    }
}

fn parse_key(body: &[u8]) -> AdaptiveResult<[u8; 16]> {
    if let Ok(key) = <[u8; 16]>::try_from(body) {
        return Ok(key);
    }

    // Some servers deliver the key hex encoded
    let trimmed = body.trim_ascii();
    if trimmed.len() == 32 {
        let decoded = hex::decode(trimmed)?;
        return decoded
            .try_into()
            .map_err(AdaptiveError::InvalidAes128Key);
    }

    Err(AdaptiveError::InvalidAes128Key(body.to_vec()))
}
