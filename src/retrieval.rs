//! Knowledge-base retrieval for prompt placeholders.
//!
//! Only the index contract lives here; callers bring their own vector store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::agent::llm::LlmClient;
use crate::Result;

/// A scored hit returned by a [`VectorIndex`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Vector store queried with an embedding and an optional metadata filter.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        filter: Option<&Value>,
        top_k: usize,
    ) -> Result<Vec<IndexMatch>>;
}

/// Join the `text_key` metadata of matches scoring at least `min_score`,
/// dropping repeats, into one placeholder value.
pub fn render_matches(matches: &[IndexMatch], text_key: &str, min_score: f32) -> String {
    let mut texts: Vec<&str> = Vec::new();
    for m in matches.iter().filter(|m| m.score >= min_score) {
        if let Some(text) = m.metadata.get(text_key).and_then(Value::as_str) {
            if !texts.contains(&text) {
                texts.push(text);
            }
        }
    }
    texts.join("\n\n")
}

/// Retrieval query parameters.
#[derive(Debug, Clone)]
pub struct RetrievalQuery<'a> {
    pub text: &'a str,
    pub embedding_model: &'a str,
    pub filter: Option<Value>,
    pub top_k: usize,
    pub text_key: &'a str,
    pub min_score: f32,
}

impl<'a> RetrievalQuery<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            embedding_model: "text-embedding-ada-002",
            filter: None,
            top_k: 5,
            text_key: "text",
            min_score: 0.0,
        }
    }
}

/// Embed the query text, search `index`, and render the hits.
pub async fn retrieve_context<C, I>(client: &C, index: &I, query: &RetrievalQuery<'_>) -> Result<String>
where
    C: LlmClient + ?Sized,
    I: VectorIndex + ?Sized,
{
    let vector = client.embed(query.text, query.embedding_model).await?;
    let matches = index
        .query(&vector, query.filter.as_ref(), query.top_k)
        .await?;
    debug!("Retrieved {} matches for context", matches.len());
    Ok(render_matches(&matches, query.text_key, query.min_score))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::agent::llm::FakeLlmClient;

    fn hit(id: &str, score: f32, text: &str) -> IndexMatch {
        let mut metadata = Map::new();
        metadata.insert("text".to_string(), json!(text));
        metadata.insert("areas_of_learning".to_string(), json!(["Mathematics"]));
        IndexMatch {
            id: id.to_string(),
            score,
            metadata,
        }
    }

    struct FakeIndex {
        matches: Vec<IndexMatch>,
        seen: Mutex<Vec<(Vec<f32>, Option<Value>, usize)>>,
    }

    #[async_trait]
    impl VectorIndex for FakeIndex {
        async fn query(
            &self,
            vector: &[f32],
            filter: Option<&Value>,
            top_k: usize,
        ) -> Result<Vec<IndexMatch>> {
            self.seen
                .lock()
                .unwrap()
                .push((vector.to_vec(), filter.cloned(), top_k));
            Ok(self.matches.iter().take(top_k).cloned().collect())
        }
    }

    #[test]
    fn test_render_matches_dedupes_and_filters() {
        let matches = vec![
            hit("1", 0.9, "Count the ducks"),
            hit("2", 0.8, "Count the ducks"),
            hit("3", 0.7, "Sort buttons by colour"),
            hit("4", 0.2, "Unrelated"),
        ];

        assert_eq!(
            render_matches(&matches, "text", 0.5),
            "Count the ducks\n\nSort buttons by colour"
        );
        assert_eq!(render_matches(&matches, "missing", 0.0), "");
    }

    #[tokio::test]
    async fn test_retrieve_context_passes_query_through() {
        let client = FakeLlmClient::new(vec![]);
        let index = FakeIndex {
            matches: vec![hit("1", 0.9, "Count the ducks"), hit("2", 0.8, "Build a tower")],
            seen: Mutex::new(Vec::new()),
        };

        let query = RetrievalQuery {
            filter: Some(json!({"type_": {"$eq": "examples"}})),
            top_k: 1,
            ..RetrievalQuery::new("maths")
        };
        let context = retrieve_context(&client, &index, &query).await.unwrap();
        assert_eq!(context, "Count the ducks");

        let seen = index.seen.lock().unwrap();
        assert_eq!(seen[0].0, vec![5.0, 1.0]);
        assert_eq!(seen[0].1, Some(json!({"type_": {"$eq": "examples"}})));
        assert_eq!(seen[0].2, 1);
    }
}
