use std::fmt::Display;
use std::io;
use std::path::Path;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tavern_core::EmbeddingClient;
use tavern_core::tool::{Error as ToolError, Tool, ToolResult};
use tavern_model::cosine_similarity;
use tokio::sync::OnceCell;

const MAX_CHUNK_CHARS: usize = 1200;
const TOP_K: usize = 3;

#[derive(Deserialize, JsonSchema)]
pub struct ConsultModuleParameters {
    #[schemars(description = "What to look up in the module, e.g. \"Who rules the village?\".")]
    question: String,
}

/// A tool that retrieves the passages of the game module most relevant to
/// a question.
///
/// The module is embedded on first use and the vectors are kept for the
/// lifetime of the tool.
pub struct ConsultModuleTool {
    parameter_schema: Value,
    chunks: Arc<Vec<String>>,
    vectors: Arc<OnceCell<Vec<Vec<f32>>>>,
    client: EmbeddingClient,
}

impl ConsultModuleTool {
    /// Creates the tool over the text of a module document.
    pub fn new(document: &str, client: EmbeddingClient) -> Self {
        let chunks = chunk_document(document, MAX_CHUNK_CHARS);
        debug!("game module split into {} chunks", chunks.len());
        Self {
            parameter_schema: super::parameter_schema::<ConsultModuleParameters>(),
            chunks: Arc::new(chunks),
            vectors: Arc::default(),
            client,
        }
    }

    /// Reads the module document at `path`.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        client: EmbeddingClient,
    ) -> io::Result<Self> {
        let document = std::fs::read_to_string(path)?;
        Ok(Self::new(&document, client))
    }
}

/// Splits `document` into paragraph chunks of at most `max_chars`
/// characters. Short paragraphs are merged, long ones are cut between
/// words.
fn chunk_document(document: &str, max_chars: usize) -> Vec<String> {
    let document = document.replace("\r\n", "\n");
    let mut chunks = vec![];
    let mut current = String::new();

    let paragraphs = document
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .flat_map(|p| split_long(p, max_chars));
    for paragraph in paragraphs {
        let len = current.chars().count();
        if len > 0 && len + 2 + paragraph.chars().count() > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn split_long(paragraph: &str, max_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= max_chars {
        return vec![paragraph.to_owned()];
    }
    let mut pieces = vec![];
    let mut piece = String::new();
    for word in paragraph.split_whitespace() {
        let word_len = word.chars().count();
        let len = piece.chars().count();
        if len > 0 && len + 1 + word_len > max_chars {
            pieces.push(std::mem::take(&mut piece));
        }
        if word_len > max_chars {
            // A single huge "word", cut it anywhere.
            let chars: Vec<char> = word.chars().collect();
            for part in chars.chunks(max_chars) {
                pieces.push(part.iter().collect());
            }
            continue;
        }
        if !piece.is_empty() {
            piece.push(' ');
        }
        piece.push_str(word);
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

async fn consult(
    question: String,
    chunks: Arc<Vec<String>>,
    vectors: Arc<OnceCell<Vec<Vec<f32>>>>,
    client: EmbeddingClient,
) -> ToolResult {
    if chunks.is_empty() {
        return Err(ToolError::execution_error().with_reason("the game module is empty"));
    }
    let vectors = vectors
        .get_or_try_init(|| async {
            info!("embedding the game module");
            let vectors = client
                .embed(chunks.to_vec())
                .await
                .map_err(embedding_error)?;
            if vectors.len() != chunks.len() {
                return Err(ToolError::execution_error()
                    .with_reason("the embedding model returned a wrong number of vectors"));
            }
            Ok(vectors)
        })
        .await?;

    let query = client
        .embed(vec![question])
        .await
        .map_err(embedding_error)?;
    let Some(query) = query.first() else {
        return Err(ToolError::execution_error()
            .with_reason("the embedding model returned no vector"));
    };

    let mut scored: Vec<(f32, &str)> = vectors
        .iter()
        .zip(chunks.iter())
        .map(|(vector, chunk)| (cosine_similarity(query, vector), chunk.as_str()))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));

    let passages: Vec<String> = scored
        .into_iter()
        .take(TOP_K)
        .enumerate()
        .map(|(idx, (_, chunk))| format!("[{}] {chunk}", idx + 1))
        .collect();
    Ok(passages.join("\n\n"))
}

fn embedding_error(err: impl Display) -> ToolError {
    ToolError::execution_error().with_reason(format!("embedding failed: {err}"))
}

impl Tool for ConsultModuleTool {
    type Input = ConsultModuleParameters;

    fn name(&self) -> &str {
        "consult_the_game_module"
    }

    fn description(&self) -> &str {
        r#"
Looks up the game module being played: its story background, places, characters and rules.
Returns the most relevant passages. Consult it before making up facts about the adventure."#
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let chunks = Arc::clone(&self.chunks);
        let vectors = Arc::clone(&self.vectors);
        let client = self.client.clone();
        async move {
            let question = input.question.trim().to_owned();
            if question.is_empty() {
                return Err(ToolError::invalid_input().with_reason("the question is empty"));
            }
            consult(question, chunks, vectors, client).await
        }
    }
}
