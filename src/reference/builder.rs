//! Turns parsed articles into identified, metadata-tagged chunks and loads
//! them into a vector collection.
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::ReferenceError;
use super::parser::{HeadingMarkers, ParsedArticle, parse_reference_document};
use crate::config::ReferenceConfig;
use crate::normalizer::collapse_blank_lines;
use crate::vector::{Collection, IndexError, SourceStamp, VectorIndex};

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceChunk {
    pub id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// Drops non-ASCII and control characters, then trims.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// `{collection}_{CHAPTER}{numeral}_{ARTICLE}{number}`, skipping empty parts.
pub fn chunk_id(
    collection: &str,
    markers: &HeadingMarkers,
    chapter_numeral: Option<&str>,
    article_number: &str,
) -> String {
    let chapter = chapter_numeral
        .filter(|n| !n.is_empty())
        .map(|n| format!("{}{}", markers.chapter.to_uppercase(), n));
    let article = (!article_number.is_empty())
        .then(|| format!("{}{}", markers.article.to_uppercase(), article_number));

    [Some(collection.to_string()), chapter, article]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn split_article_number(number: &str) -> (u64, &str) {
    let digits_end = number
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(number.len());
    let value = number[..digits_end].parse().unwrap_or(u64::MAX);
    (value, &number[digits_end..])
}

/// Unique article numbers referenced in `content`, in numeric order.
pub fn cross_references(content: &str, pattern: &regex::Regex) -> Vec<String> {
    let mut refs: Vec<String> = pattern
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_uppercase())
        .collect();
    refs.sort_by(|a, b| split_article_number(a).cmp(&split_article_number(b)));
    refs.dedup();
    refs
}

fn insert_text(meta: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(clean) = value.map(sanitize).filter(|v| !v.is_empty()) {
        meta.insert(key.to_string(), Value::String(clean));
    }
}

/// Builds chunks from parsed articles. Articles with no content or no
/// number are skipped; ids repeated within the build get a numeric suffix.
pub fn build_chunks(
    articles: &[ParsedArticle],
    collection: &str,
    markers: &HeadingMarkers,
    document_title: &str,
) -> Result<Vec<ReferenceChunk>, ReferenceError> {
    let reference_pattern = markers.article_reference_pattern()?;
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut chunks = Vec::with_capacity(articles.len());

    for article in articles {
        if article.content.trim().is_empty() || article.article_number.is_empty() {
            continue;
        }

        let base_id = chunk_id(
            collection,
            markers,
            article.chapter_numeral.as_deref(),
            &article.article_number,
        );
        let occurrence = seen.entry(base_id.clone()).or_insert(0);
        *occurrence += 1;
        let id = if *occurrence == 1 {
            base_id
        } else {
            warn!("Duplicate reference chunk id {base_id}, storing as occurrence {occurrence}");
            format!("{base_id}_{occurrence}")
        };

        let mut metadata = Map::new();
        insert_text(&mut metadata, "document_title", Some(document_title));
        insert_text(&mut metadata, "chapter_numeral", article.chapter_numeral.as_deref());
        insert_text(&mut metadata, "chapter_title", article.chapter_title.as_deref());
        insert_text(&mut metadata, "section_title", article.section_title.as_deref());
        insert_text(
            &mut metadata,
            "subsection_number",
            article.subsection_number.as_deref(),
        );
        insert_text(&mut metadata, "article_number", Some(&article.article_number));

        let refs = cross_references(&article.content, &reference_pattern);
        if !refs.is_empty() {
            metadata.insert("cross_references".to_string(), Value::String(refs.join(",")));
        }

        chunks.push(ReferenceChunk {
            id,
            content: article.content.clone(),
            metadata,
        });
    }

    Ok(chunks)
}

/// Builds and refreshes the reference collection.
#[derive(Clone)]
pub struct ReferenceBuilder {
    index: VectorIndex,
    markers: HeadingMarkers,
    document_title: String,
}

impl ReferenceBuilder {
    pub fn new(index: VectorIndex, markers: HeadingMarkers, document_title: &str) -> Self {
        Self {
            index,
            markers,
            document_title: document_title.to_string(),
        }
    }

    pub fn from_config(index: VectorIndex, config: &ReferenceConfig) -> Self {
        Self::new(index, config.markers.clone(), &config.document_title)
    }

    /// Parses `text` and replaces `collection_name` with its chunks.
    pub async fn build_from_text(
        &self,
        text: &str,
        collection_name: &str,
        source: Option<SourceStamp>,
    ) -> Result<Collection, ReferenceError> {
        let cleaned = collapse_blank_lines(text);
        let articles = parse_reference_document(&cleaned, &self.markers)?;
        let chunks = build_chunks(
            &articles,
            collection_name,
            &self.markers,
            &self.document_title,
        )?;

        if chunks.is_empty() {
            let origin = source
                .as_ref()
                .map_or_else(|| collection_name.to_string(), |s| s.path.clone());
            return Err(ReferenceError::NoChunks(origin));
        }

        match self.index.delete_collection(collection_name).await {
            Ok(()) => info!("Existing collection {collection_name} deleted"),
            Err(IndexError::NotFound(_)) => {
                info!("Collection {collection_name} did not exist, nothing to delete")
            }
            Err(e) => return Err(e.into()),
        }

        let collection = self.index.create_collection(collection_name, source).await?;

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let metadatas: Vec<Map<String, Value>> =
            chunks.into_iter().map(|c| c.metadata).collect();

        let added = match collection.add(&ids, &texts, &metadatas).await {
            Ok(added) => added,
            Err(e) => {
                // A stamped but empty collection would pass the freshness check
                warn!("Building {collection_name} failed, dropping the partial collection: {e}");
                if let Err(cleanup) = self.index.delete_collection(collection_name).await {
                    warn!("Failed to drop partial collection {collection_name}: {cleanup}");
                }
                return Err(e.into());
            }
        };
        info!("Collection {collection_name} built with {added} chunks");
        Ok(collection)
    }

    /// Reads `source_path` and rebuilds `collection_name` from it.
    pub async fn build(
        &self,
        source_path: &str,
        collection_name: &str,
    ) -> Result<Collection, ReferenceError> {
        info!("Building reference collection {collection_name} from {source_path}");
        let io_err = |source| ReferenceError::Io {
            path: source_path.to_string(),
            source,
        };
        let text = tokio::fs::read_to_string(source_path)
            .await
            .map_err(io_err)?;
        let modified_at = source_modified_at(Path::new(source_path))
            .await
            .map_err(io_err)?;

        let stamp = SourceStamp {
            path: source_path.to_string(),
            modified_at,
        };
        self.build_from_text(&text, collection_name, Some(stamp))
            .await
    }

    /// Get-or-build. Without `force_recreate`, an existing collection is
    /// reused unless its source file has changed since it was built.
    pub async fn ensure(
        &self,
        source_path: &str,
        collection_name: &str,
        force_recreate: bool,
    ) -> Result<Collection, ReferenceError> {
        if force_recreate {
            info!("Force recreating collection {collection_name}");
            return self.build(source_path, collection_name).await;
        }

        let existing = match self.index.get_collection(collection_name).await {
            Ok(collection) => collection,
            Err(e) => {
                info!("Collection {collection_name} unavailable ({e}), building it now");
                return self.build(source_path, collection_name).await;
            }
        };

        let current = match source_modified_at(Path::new(source_path)).await {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Cannot stat {source_path} ({e}), reusing collection {collection_name}");
                return Ok(existing);
            }
        };

        let count = existing.count().await?;
        if count == 0 {
            info!("Collection {collection_name} is empty, rebuilding it");
            self.build(source_path, collection_name).await
        } else if is_fresh(existing.source(), source_path, current) {
            info!("Collection {collection_name} found with {count} items");
            Ok(existing)
        } else {
            info!("Reference source {source_path} changed, rebuilding {collection_name}");
            self.build(source_path, collection_name).await
        }
    }
}

fn is_fresh(stamp: Option<&SourceStamp>, source_path: &str, current: DateTime<Utc>) -> bool {
    stamp.is_some_and(|s| {
        s.path == source_path && s.modified_at.timestamp_millis() == current.timestamp_millis()
    })
}

async fn source_modified_at(path: &Path) -> std::io::Result<DateTime<Utc>> {
    let modified = tokio::fs::metadata(path).await?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;
    use crate::embedder::mock::MockEmbedder;
    use crate::embedder::{Embedder, EmbedderError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, SystemTime};
    use tokio::sync::Mutex as TokioMutex;

    const DOC: &str = "\
# BAB IX
## HUBUNGAN KERJA
### Pasal 56
Perjanjian kerja dibuat untuk waktu tertentu atau untuk waktu tidak tertentu.
### Pasal 59
Perjanjian kerja untuk waktu tertentu sebagaimana dimaksud dalam Pasal 56 dan Pasal 57
tidak dapat diadakan untuk pekerjaan yang bersifat tetap. Lihat juga Pasal 56.
# BAB X
## PERLINDUNGAN, PENGUPAHAN, DAN KESEJAHTERAAN
### Bagian Kedua
#### Paragraf 2
### Pasal 88
Setiap pekerja berhak memperoleh penghasilan.
";

    fn builder() -> ReferenceBuilder {
        let db = Db::open_in_memory(16).unwrap();
        let index = VectorIndex::new(
            Arc::new(TokioMutex::new(db)),
            Arc::new(MockEmbedder::new(16)),
        );
        ReferenceBuilder::new(index, HeadingMarkers::default(), "UU 13/2003")
    }

    fn parsed(doc: &str) -> Vec<ReferenceChunk> {
        let markers = HeadingMarkers::default();
        let articles = parse_reference_document(doc, &markers).unwrap();
        build_chunks(&articles, "uu_reference", &markers, "UU 13/2003").unwrap()
    }

    #[test]
    fn test_chunk_ids_and_metadata() {
        let chunks = parsed(DOC);
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "uu_reference_BABIX_PASAL56",
                "uu_reference_BABIX_PASAL59",
                "uu_reference_BABX_PASAL88",
            ]
        );

        let meta = &chunks[2].metadata;
        assert_eq!(meta["document_title"], "UU 13/2003");
        assert_eq!(meta["chapter_numeral"], "X");
        assert_eq!(meta["section_title"], "Kedua");
        assert_eq!(meta["subsection_number"], "2");
        assert_eq!(meta["article_number"], "88");

        // Optional keys are omitted when absent
        assert!(!chunks[0].metadata.contains_key("section_title"));
        assert!(!chunks[0].metadata.contains_key("subsection_number"));
    }

    #[test]
    fn test_cross_references_sorted_and_unique() {
        let chunks = parsed(DOC);
        assert_eq!(chunks[1].metadata["cross_references"], "56,57,59");
        assert_eq!(chunks[0].metadata["cross_references"], "56");
    }

    #[test]
    fn test_cross_reference_numeric_order() {
        let re = HeadingMarkers::default().article_reference_pattern().unwrap();
        let refs = cross_references("Pasal 100, Pasal 9, Pasal 59A, Pasal 59, Pasal 9", &re);
        assert_eq!(refs, vec!["9", "59", "59A", "100"]);
    }

    #[test]
    fn test_chunk_id_without_chapter() {
        let markers = HeadingMarkers::default();
        assert_eq!(chunk_id("ref", &markers, None, "1"), "ref_PASAL1");
        assert_eq!(chunk_id("ref", &markers, Some("II"), "3"), "ref_BABII_PASAL3");
    }

    #[test]
    fn test_duplicate_ids_get_suffix() {
        let chunks = parsed("# BAB I\n### Pasal 1\nA.\n### Pasal 1\nB.\n### Pasal 1\nC.");
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "uu_reference_BABI_PASAL1",
                "uu_reference_BABI_PASAL1_2",
                "uu_reference_BABI_PASAL1_3",
            ]
        );
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  Kesatu\u{0007}\u{00a0} "), "Kesatu");
        assert_eq!(sanitize("Ketentuan\tUmum"), "KetentuanUmum");
        assert_eq!(sanitize("\u{200b}"), "");
    }

    #[tokio::test]
    async fn test_build_from_text_replaces_collection() {
        let builder = builder();
        let first = builder
            .build_from_text(DOC, "uu_reference", None)
            .await
            .unwrap();
        assert_eq!(first.count().await.unwrap(), 3);

        // Rebuilding from a smaller source leaves no stale chunks behind
        let second = builder
            .build_from_text("# BAB I\n### Pasal 1\nIsi.", "uu_reference", None)
            .await
            .unwrap();
        assert_eq!(second.count().await.unwrap(), 1);
        assert_eq!(second.ids().await.unwrap(), vec!["uu_reference_BABI_PASAL1"]);
    }

    #[tokio::test]
    async fn test_build_without_articles_fails() {
        let err = builder()
            .build_from_text("# BAB I\n## UMUM\n", "uu_reference", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReferenceError::NoChunks(_)));
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uu.md");
        std::fs::write(&path, DOC).unwrap();
        let path = path.to_str().unwrap();

        let builder = builder();
        let first = builder.ensure(path, "uu_reference", false).await.unwrap();
        let second = builder.ensure(path, "uu_reference", false).await.unwrap();
        assert_eq!(first.count().await.unwrap(), 3);
        assert_eq!(second.count().await.unwrap(), first.count().await.unwrap());
        assert_eq!(first.source(), second.source());

        let forced = builder.ensure(path, "uu_reference", true).await.unwrap();
        assert_eq!(forced.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ensure_rebuilds_when_source_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uu.md");
        std::fs::write(&path, DOC).unwrap();
        let path_str = path.to_str().unwrap();

        let builder = builder();
        builder.ensure(path_str, "uu_reference", false).await.unwrap();

        let amended = format!("{DOC}### Pasal 89\nUpah minimum.\n");
        std::fs::write(&path, amended).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        let rebuilt = builder.ensure(path_str, "uu_reference", false).await.unwrap();
        assert_eq!(rebuilt.count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_ensure_reuses_when_source_missing() {
        let builder = builder();
        builder
            .build_from_text(DOC, "uu_reference", None)
            .await
            .unwrap();

        let reused = builder
            .ensure("/nonexistent/uu.md", "uu_reference", false)
            .await
            .unwrap();
        assert_eq!(reused.count().await.unwrap(), 3);

        // Nothing to reuse and nothing to read
        let err = builder
            .ensure("/nonexistent/uu.md", "other", false)
            .await
            .unwrap_err();
        assert!(matches!(err, ReferenceError::Io { .. }));
    }

    /// Fails the first `embed_batch` call, then delegates to the mock.
    struct FlakyEmbedder {
        inner: MockEmbedder,
        failed: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
            self.inner.embed(text).await
        }

        async fn embed_batch(
            &self,
            texts: &[&str],
        ) -> Result<Vec<Vec<f32>>, EmbedderError> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(EmbedderError::RequestFailed("status 503".to_string()));
            }
            self.inner.embed_batch(texts).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    #[tokio::test]
    async fn test_failed_build_is_not_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uu.md");
        std::fs::write(&path, DOC).unwrap();
        let path = path.to_str().unwrap();

        let index = VectorIndex::new(
            Arc::new(TokioMutex::new(Db::open_in_memory(16).unwrap())),
            Arc::new(FlakyEmbedder {
                inner: MockEmbedder::new(16),
                failed: AtomicBool::new(false),
            }),
        );
        let builder = ReferenceBuilder::new(index.clone(), HeadingMarkers::default(), "UU");

        assert!(builder.ensure(path, "uu_reference", false).await.is_err());
        assert!(matches!(
            index.get_collection("uu_reference").await,
            Err(IndexError::NotFound(_))
        ));

        let rebuilt = builder.ensure(path, "uu_reference", false).await.unwrap();
        assert_eq!(rebuilt.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_ensure_rebuilds_empty_collection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("uu.md");
        std::fs::write(&path, DOC).unwrap();
        let path = path.to_str().unwrap();

        let builder = builder();
        let built = builder.ensure(path, "uu_reference", false).await.unwrap();
        let stamp = built.source().cloned();

        // Same stamp, no chunks
        builder.index.delete_collection("uu_reference").await.unwrap();
        builder
            .index
            .create_collection("uu_reference", stamp)
            .await
            .unwrap();

        let collection = builder.ensure(path, "uu_reference", false).await.unwrap();
        assert_eq!(collection.count().await.unwrap(), 3);
    }
}
