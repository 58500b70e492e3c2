use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use ureq::Agent;

use crate::config::ArtworkConfig;
use crate::db::Database;
use crate::models::{ArtworkLink, NowPlayingInfo};

/// Finds the album id for a free-text track search.
pub trait AlbumSearch: Send {
    fn album_id(&self, terms: &str) -> Result<Option<u64>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    data: Option<SearchData>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    song: Option<SongList>,
}

#[derive(Debug, Deserialize)]
struct SongList {
    #[serde(default)]
    list: Vec<SongHit>,
}

#[derive(Debug, Deserialize)]
struct SongHit {
    albumid: Option<u64>,
}

/// QQ Music's public track search.
pub struct QqMusicSearch {
    agent: Agent,
    search_url: String,
}

impl QqMusicSearch {
    pub fn new(config: &ArtworkConfig) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build()
            .into();

        Self {
            agent,
            search_url: config.search_url.clone(),
        }
    }
}

impl AlbumSearch for QqMusicSearch {
    fn album_id(&self, terms: &str) -> Result<Option<u64>> {
        debug!("Searching album art for '{terms}'");

        let response = self
            .agent
            .get(&self.search_url)
            .query("p", "1")
            .query("n", "1")
            .query("w", terms)
            .query("format", "json")
            .call()
            .with_context(|| "Album search request failed")?;

        let (_parts, body) = response.into_parts();
        let parsed: SearchResponse = serde_json::from_reader(body.into_reader())
            .with_context(|| "Failed to parse album search response")?;

        Ok(first_album_id(parsed))
    }
}

fn first_album_id(response: SearchResponse) -> Option<u64> {
    response
        .data?
        .song?
        .list
        .into_iter()
        .next()
        .and_then(|hit| hit.albumid)
}

pub fn album_art_url(album_id: u64) -> String {
    format!(
        "https://imgcache.qq.com/music/photo/album_300/{}/300_albumpic_{}_0.jpg",
        album_id % 100,
        album_id
    )
}

/// Resolves artwork links, consulting the on-disk cache first.
pub struct ArtworkResolver {
    db: Database,
    search: Box<dyn AlbumSearch>,
}

impl ArtworkResolver {
    pub fn new(db: Database, search: Box<dyn AlbumSearch>) -> Self {
        Self { db, search }
    }

    pub fn resolve(&self, info: &NowPlayingInfo) -> Result<Option<String>> {
        let hash = info.cache_key();

        if let Some(cached) = self.db.get_artwork_link(&hash)? {
            debug!("Artwork cache hit for {hash}");
            return Ok(Some(cached.link));
        }

        let Some(album_id) = self.search.album_id(&info.search_terms())? else {
            return Ok(None);
        };

        let link = album_art_url(album_id);
        self.db
            .insert_artwork_link(&ArtworkLink::new(hash.clone(), link.clone()))?;
        info!("Cached artwork for {hash}");
        Ok(Some(link))
    }

    /// Like [`resolve`](Self::resolve), but failures give an empty link.
    pub fn resolve_or_empty(&self, info: &NowPlayingInfo) -> String {
        match self.resolve(info) {
            Ok(link) => link.unwrap_or_default(),
            Err(e) => {
                warn!("Artwork lookup failed: {e:#}");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSearch {
        album_id: Option<u64>,
        calls: Arc<AtomicUsize>,
    }

    impl AlbumSearch for FixedSearch {
        fn album_id(&self, _terms: &str) -> Result<Option<u64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.album_id)
        }
    }

    struct BrokenSearch;

    impl AlbumSearch for BrokenSearch {
        fn album_id(&self, _terms: &str) -> Result<Option<u64>> {
            bail!("network down")
        }
    }

    fn track() -> NowPlayingInfo {
        NowPlayingInfo {
            title: Some("七里香".to_string()),
            artist: Some("周杰伦".to_string()),
            album: Some("七里香".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_album_art_url() {
        assert_eq!(
            album_art_url(8220),
            "https://imgcache.qq.com/music/photo/album_300/20/300_albumpic_8220_0.jpg"
        );
    }

    #[test]
    fn test_first_album_id_from_response() {
        let json = r#"{"code":0,"data":{"song":{"list":[{"albumid":14536,"songname":"x"},{"albumid":1}]}}}"#;
        let parsed: SearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(first_album_id(parsed), Some(14536));

        let empty: SearchResponse =
            serde_json::from_str(r#"{"data":{"song":{"list":[]}}}"#).unwrap();
        assert_eq!(first_album_id(empty), None);

        let missing: SearchResponse = serde_json::from_str(r#"{"code":0}"#).unwrap();
        assert_eq!(first_album_id(missing), None);
    }

    #[test]
    fn test_resolve_caches_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = ArtworkResolver::new(
            Database::open_in_memory().unwrap(),
            Box::new(FixedSearch {
                album_id: Some(305),
                calls: Arc::clone(&calls),
            }),
        );

        let first = resolver.resolve(&track()).unwrap();
        let second = resolver.resolve(&track()).unwrap();

        assert_eq!(first, Some(album_art_url(305)));
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_resolve_without_hit_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = ArtworkResolver::new(
            Database::open_in_memory().unwrap(),
            Box::new(FixedSearch {
                album_id: None,
                calls: Arc::clone(&calls),
            }),
        );

        assert_eq!(resolver.resolve(&track()).unwrap(), None);
        assert_eq!(resolver.resolve(&track()).unwrap(), None);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_lookup_gives_empty_link() {
        let resolver =
            ArtworkResolver::new(Database::open_in_memory().unwrap(), Box::new(BrokenSearch));
        assert_eq!(resolver.resolve_or_empty(&track()), "");
    }
}
