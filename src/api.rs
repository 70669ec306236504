use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use config_model::{Rating, SearchOptions};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One post as returned by a Konachan-compatible `post.json` endpoint. Only
/// the fields the cache needs are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Post {
    #[serde(default)]
    pub md5: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub query: String,
    pub rating: Rating,
    pub min_score: Option<u32>,
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    /// Value of the `tags` query parameter.
    pub fn tags(&self) -> String {
        let mut tags = format!("{} rating:{}", self.query, self.rating.as_tag());
        if let Some(score) = self.min_score {
            tags.push_str(&format!(" score:>={score}"));
        }
        tags
    }
}

/// Source of image metadata pages.
pub trait MetadataSource: Send + Sync {
    fn fetch_page(
        &self,
        request: &PageRequest,
    ) -> impl Future<Output = Result<Vec<Post>>> + Send;
}

/// Collects `hash -> url` for every rating × query combination.
///
/// Each query pages from 1 up to `max_pages` and stops early on an empty page
/// or an error; an error only truncates the query it happened in.
pub async fn fetch_all_image_infos<S>(
    source: &S,
    search: &SearchOptions,
) -> BTreeMap<String, String>
where
    S: MetadataSource,
{
    let mut results = BTreeMap::new();
    for rating in search.unique_ratings() {
        for query in &search.queries {
            for page in 1..=search.max_pages {
                let request = PageRequest {
                    query: query.clone(),
                    rating,
                    min_score: search.min_score,
                    page,
                    limit: search.page_limit,
                };
                let posts = match source.fetch_page(&request).await {
                    Ok(posts) => posts,
                    Err(err) => {
                        warn!(
                            query = %query,
                            rating = rating.as_tag(),
                            page,
                            error = %err,
                            "metadata page failed"
                        );
                        break;
                    }
                };
                if posts.is_empty() {
                    break;
                }
                let before = results.len();
                collect_posts(&mut results, posts, search.max_image_size);
                debug!(
                    query = %query,
                    rating = rating.as_tag(),
                    page,
                    added = results.len() - before,
                    "metadata page fetched"
                );
            }
        }
    }
    info!(total = results.len(), "image info fetched");
    results
}

fn collect_posts(
    results: &mut BTreeMap<String, String>,
    posts: Vec<Post>,
    max_size: Option<u64>,
) {
    for post in posts {
        let (Some(hash), Some(url)) = (post.md5, post.file_url) else {
            continue;
        };
        if hash.is_empty() || url.is_empty() || results.contains_key(&hash) {
            continue;
        }
        if matches!((max_size, post.file_size), (Some(max), Some(size)) if size > max) {
            continue;
        }
        results.insert(hash, url);
    }
}

/// Talks to the image board over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetadataSource {
    client: reqwest::Client,
    api_url: String,
}

impl HttpMetadataSource {
    pub fn new(api_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }
}

impl MetadataSource for HttpMetadataSource {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Vec<Post>> {
        let response = self
            .client
            .get(&self.api_url)
            .query(&[
                ("limit", request.limit.to_string()),
                ("page", request.page.to_string()),
                ("tags", request.tags()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus(status));
        }
        Ok(response.json::<Vec<Post>>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_include_rating_and_score() {
        let request = PageRequest {
            query: "landscape".into(),
            rating: Rating::Questionable,
            min_score: Some(25),
            page: 1,
            limit: 100,
        };
        assert_eq!(request.tags(), "landscape rating:q score:>=25");
        let request = PageRequest {
            min_score: None,
            ..request
        };
        assert_eq!(request.tags(), "landscape rating:q");
    }

    #[test]
    fn post_fields_are_optional() {
        let raw = r#"[{"md5":"a","file_url":"u","file_size":3,"id":1},{}]"#;
        let posts: Vec<Post> = serde_json::from_str(raw).unwrap();
        assert_eq!(posts[0].file_size, Some(3));
        assert_eq!(posts[1], Post::default());
    }

    #[test]
    fn collect_skips_incomplete_seen_and_oversized() {
        let mut results = BTreeMap::from([("seen".to_string(), "first".to_string())]);
        let post = |md5: Option<&str>, url: Option<&str>, size: Option<u64>| Post {
            md5: md5.map(str::to_string),
            file_url: url.map(str::to_string),
            file_size: size,
        };
        collect_posts(
            &mut results,
            vec![
                post(Some("seen"), Some("second"), None),
                post(None, Some("u"), None),
                post(Some("nourl"), None, None),
                post(Some("big"), Some("u"), Some(2048)),
                post(Some("ok"), Some("u"), Some(1024)),
                post(Some("unsized"), Some("u"), None),
            ],
            Some(1024),
        );
        assert_eq!(results.get("seen").map(String::as_str), Some("first"));
        assert!(results.contains_key("ok"));
        assert!(results.contains_key("unsized"));
        assert!(!results.contains_key("big"));
        assert!(!results.contains_key("nourl"));
        assert_eq!(results.len(), 3);
    }
}
