//! Command-line front end for the ragway gateway and RAG pipeline.
//!
//! `ask` and `search` ingest the given files into an in-memory store for the
//! length of one invocation, then run the pipeline over them.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use ragway_model::{
    ChatMessage, ChatRequest, Gateway, GatewayConfig, MockBackend, ModelError, ModelKind,
    RequestContext, StreamEvent,
};
use ragway_rag::{
    ChunkStrategy, Citation, InMemoryVectorStore, IngestRequest, QueryRequest, RagConfig, RagError,
    RagPipeline, SearchRequest, SearchResult,
};
use ragway_telemetry::SpanStore;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Multi-backend LLM gateway with retrieval-augmented answers.
#[derive(Parser, Debug)]
#[command(name = "ragway", version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Give up after this many seconds
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Use a scripted local backend instead of configured providers
    #[arg(long, global = true)]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List models offered by the configured backends
    Models {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Send one prompt to a chat model
    Chat(ChatArgs),
    /// Answer a question from local files
    Ask(AskArgs),
    /// Rank passages of local files against a query
    Search(SearchArgs),
}

#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Prompt text
    pub prompt: String,

    /// Model id (gateway default when omitted)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Backend name (gateway default when omitted)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    /// Print text as it is generated
    #[arg(long)]
    pub stream: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CorpusArgs {
    /// Files to ingest
    #[arg(short, long = "file", required = true, num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Chunk size in characters
    #[arg(long, default_value_t = 1000)]
    pub chunk_size: usize,

    /// Overlap between fixed-size chunks
    #[arg(long, default_value_t = 200)]
    pub chunk_overlap: usize,

    /// fixed, sentence or recursive
    #[arg(long, default_value_t = ChunkStrategy::Recursive)]
    pub strategy: ChunkStrategy,

    /// Embedding model id
    #[arg(long)]
    pub embedding_model: Option<String>,

    /// Backend used for embeddings
    #[arg(long)]
    pub embedding_backend: Option<String>,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct RetrievalArgs {
    /// Number of chunks (configured default when zero)
    #[arg(short = 'k', long, default_value_t = 0)]
    pub top_k: i32,

    /// Drop chunks scoring below this value
    #[arg(long, default_value_t = 0.0)]
    pub min_score: f32,

    /// Combine vector and keyword scores
    #[arg(long)]
    pub hybrid: bool,

    /// Rerank with the assistant model
    #[arg(long)]
    pub rerank: bool,

    /// Retrieve with rewritten queries
    #[arg(long)]
    pub rewrite: bool,

    /// Retrieve with a hypothetical answer passage
    #[arg(long)]
    pub hyde: bool,

    /// Print pipeline span timings after the result
    #[arg(long)]
    pub trace: bool,
}

#[derive(Args, Debug)]
pub struct AskArgs {
    /// The question
    pub question: String,

    #[command(flatten)]
    pub corpus: CorpusArgs,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,

    /// Answer model (gateway default when omitted)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Answer backend (gateway default when omitted)
    #[arg(short, long)]
    pub backend: Option<String>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search text
    pub query: String,

    #[command(flatten)]
    pub corpus: CorpusArgs,

    #[command(flatten)]
    pub retrieval: RetrievalArgs,
}

/// Build the gateway for this invocation.
pub fn build_gateway(offline: bool) -> Result<Arc<Gateway>> {
    let gateway = if offline {
        Gateway::builder().backend(Arc::new(MockBackend::new("offline"))).build()?
    } else {
        GatewayConfig::from_env()
            .context("reading gateway configuration")?
            .build_gateway()
            .context("no usable backend; set OPENAI_API_KEY, ANTHROPIC_API_KEY or OLLAMA_URL")?
    };
    Ok(Arc::new(gateway))
}

/// Request context for one invocation, with an optional deadline.
pub fn request_context(timeout: Option<u64>) -> RequestContext {
    let ctx = RequestContext::new(Uuid::new_v4());
    match timeout {
        Some(secs) => ctx.with_timeout(Duration::from_secs(secs)),
        None => ctx,
    }
}

/// Run `command`, writing results to `out`.
///
/// `spans` is the store the global subscriber records into, used by
/// `--trace`.
pub async fn run<W: Write>(
    command: Command,
    gateway: Arc<Gateway>,
    ctx: &RequestContext,
    spans: Option<&SpanStore>,
    out: &mut W,
) -> Result<()> {
    match command {
        Command::Models { json } => list_models(&gateway, json, out),
        Command::Chat(args) => chat(&gateway, ctx, args, out).await,
        Command::Ask(args) => {
            let trace = args.retrieval.trace;
            ask(gateway, ctx, args, out).await?;
            if trace {
                print_trace(ctx, spans, out)?;
            }
            Ok(())
        }
        Command::Search(args) => {
            let trace = args.retrieval.trace;
            search(gateway, ctx, args, out).await?;
            if trace {
                print_trace(ctx, spans, out)?;
            }
            Ok(())
        }
    }
}

fn kind_label(kind: ModelKind) -> &'static str {
    match kind {
        ModelKind::Chat => "chat",
        ModelKind::Embedding => "embedding",
    }
}

fn list_models<W: Write>(gateway: &Gateway, json: bool, out: &mut W) -> Result<()> {
    let models = gateway.list_models();
    if json {
        serde_json::to_writer_pretty(&mut *out, &models)?;
        writeln!(out)?;
        return Ok(());
    }
    for info in &models {
        writeln!(out, "{:<12} {:<10} {}", info.backend, kind_label(info.kind), info.model)?;
    }
    Ok(())
}

async fn chat<W: Write>(
    gateway: &Gateway,
    ctx: &RequestContext,
    args: ChatArgs,
    out: &mut W,
) -> Result<()> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = args.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(args.prompt));

    let mut request = ChatRequest::new(args.model.unwrap_or_default(), messages);
    if let Some(backend) = args.backend {
        request = request.with_backend(backend);
    }
    if let Some(temperature) = args.temperature {
        request = request.with_temperature(temperature);
    }

    if !args.stream {
        let response = gateway.chat(ctx, request).await?;
        writeln!(out, "{}", response.content)?;
        info!(
            backend = %response.backend,
            model = %response.model,
            tokens = response.usage.total_tokens,
            cost_usd = response.cost_usd,
            latency_ms = response.latency_ms,
            "chat completed"
        );
        return Ok(());
    }

    let mut stream = gateway.chat_stream(ctx, request).await?;
    while let Some(event) = ctx.run(stream.next()).await.map_err(ModelError::from)? {
        match event {
            StreamEvent::Delta(text) => {
                write!(out, "{text}")?;
                out.flush()?;
            }
            StreamEvent::Done { usage } => {
                writeln!(out)?;
                debug!(tokens = usage.total_tokens, "stream finished");
                return Ok(());
            }
            StreamEvent::Error(message) => bail!("stream failed: {message}"),
        }
    }
    bail!("stream ended without a final event")
}

fn rag_config(corpus: &CorpusArgs) -> Result<RagConfig> {
    let mut builder = RagConfig::builder()
        .chunk_size(corpus.chunk_size)
        .chunk_overlap(corpus.chunk_overlap)
        .chunk_strategy(corpus.strategy);
    if let Some(model) = &corpus.embedding_model {
        builder = builder.embedding_model(model);
    }
    if let Some(backend) = &corpus.embedding_backend {
        builder = builder.embedding_backend(backend);
    }
    Ok(builder.build()?)
}

/// Ingest every corpus file. Returns the source path of each document id.
async fn load_corpus(
    pipeline: &RagPipeline,
    ctx: &RequestContext,
    corpus: &CorpusArgs,
) -> Result<HashMap<Uuid, String>> {
    let mut sources = HashMap::with_capacity(corpus.files.len());
    for path in &corpus.files {
        let source = path.display().to_string();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {source}"))?;

        let document_id = Uuid::new_v4();
        let request =
            IngestRequest::new(document_id, content).with_metadata("source", source.clone());
        match pipeline.ingest(ctx, request).await {
            Ok(chunks) => {
                info!(path = %source, chunk_count = chunks.len(), "ingested file");
                sources.insert(document_id, source);
            }
            Err(RagError::NoChunks) => warn!(path = %source, "file has no text, skipping"),
            Err(err) => return Err(err).with_context(|| format!("ingesting {source}")),
        }
    }
    if sources.is_empty() {
        bail!("none of the given files contain text");
    }
    Ok(sources)
}

fn pipeline_for(gateway: Arc<Gateway>, corpus: &CorpusArgs) -> Result<RagPipeline> {
    Ok(RagPipeline::builder()
        .config(rag_config(corpus)?)
        .gateway(gateway)
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .build()?)
}

async fn ask<W: Write>(
    gateway: Arc<Gateway>,
    ctx: &RequestContext,
    args: AskArgs,
    out: &mut W,
) -> Result<()> {
    let pipeline = pipeline_for(gateway, &args.corpus)?;
    let sources = load_corpus(&pipeline, ctx, &args.corpus).await?;

    let retrieval = args.retrieval;
    let mut request = QueryRequest::new(args.question)
        .with_top_k(retrieval.top_k)
        .with_min_score(retrieval.min_score)
        .with_hybrid(retrieval.hybrid)
        .with_rerank(retrieval.rerank)
        .with_query_rewrite(retrieval.rewrite)
        .with_hyde(retrieval.hyde)
        .with_model(args.model.unwrap_or_default());
    if let Some(backend) = args.backend {
        request = request.with_backend(backend);
    }

    let response = pipeline.query(ctx, request).await?;
    writeln!(out, "{}", response.answer)?;
    if !response.citations.is_empty() {
        writeln!(out, "\nSources:")?;
        for (i, citation) in response.citations.iter().enumerate() {
            writeln!(out, "{}", citation_line(i, citation, &sources))?;
        }
    }
    writeln!(out, "\n({}, {} tokens, ${:.6})", response.model, response.tokens, response.cost_usd)?;
    Ok(())
}

async fn search<W: Write>(
    gateway: Arc<Gateway>,
    ctx: &RequestContext,
    args: SearchArgs,
    out: &mut W,
) -> Result<()> {
    let pipeline = pipeline_for(gateway, &args.corpus)?;
    let sources = load_corpus(&pipeline, ctx, &args.corpus).await?;

    let retrieval = args.retrieval;
    let request = SearchRequest::new(args.query)
        .with_top_k(retrieval.top_k)
        .with_min_score(retrieval.min_score)
        .with_hybrid(retrieval.hybrid)
        .with_rerank(retrieval.rerank)
        .with_query_rewrite(retrieval.rewrite)
        .with_hyde(retrieval.hyde);

    let results = pipeline.search(ctx, request).await?;
    if results.is_empty() {
        writeln!(out, "no matching passages")?;
    }
    for (i, result) in results.iter().enumerate() {
        writeln!(out, "{}", result_line(i, result, &sources))?;
    }
    Ok(())
}

fn source_of<'a>(document_id: &Uuid, sources: &'a HashMap<Uuid, String>) -> &'a str {
    sources.get(document_id).map(String::as_str).unwrap_or("?")
}

fn citation_line(i: usize, citation: &Citation, sources: &HashMap<Uuid, String>) -> String {
    format!(
        "[Source {}] {} (score {:.3}): {}",
        i + 1,
        source_of(&citation.document_id, sources),
        citation.score,
        citation.content.replace('\n', " ")
    )
}

fn result_line(i: usize, result: &SearchResult, sources: &HashMap<Uuid, String>) -> String {
    format!(
        "{:>2}. {:.3}  {}#{}  {}",
        i + 1,
        result.score,
        source_of(&result.document_id, sources),
        result.index,
        ragway_rag::document::preview(&result.content, 120).replace('\n', " ")
    )
}

fn print_trace<W: Write>(ctx: &RequestContext, spans: Option<&SpanStore>, out: &mut W) -> Result<()> {
    let Some(spans) = spans else {
        return Ok(());
    };
    writeln!(out, "\nTrace:")?;
    for span in spans.spans_for(&ctx.tenant_id().to_string()) {
        writeln!(out, "  {:<22} {:>8.1} ms", span.name, span.duration().as_secs_f64() * 1000.0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ragway").chain(args.iter().copied())).unwrap()
    }

    fn write_file(dir: &Path, name: &str, content: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path.display().to_string()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ragway-cli-{name}-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    async fn run_offline(args: &[&str]) -> Result<String> {
        let cli = parse(args);
        let mut out = Vec::new();
        let ctx = request_context(cli.timeout);
        run(cli.command, build_gateway(true)?, &ctx, None, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn parses_retrieval_flags() {
        let cli = parse(&[
            "ask", "what is tokio?", "-f", "a.md", "b.md", "-k", "3", "--hyde", "--strategy", "fixed",
        ]);
        let Command::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.corpus.files, [PathBuf::from("a.md"), PathBuf::from("b.md")]);
        assert_eq!(args.retrieval.top_k, 3);
        assert!(args.retrieval.hyde);
        assert!(!args.retrieval.rerank);
        assert_eq!(args.corpus.strategy, ChunkStrategy::Fixed);
        assert_eq!(args.corpus.chunk_size, 1000);
    }

    #[test]
    fn ask_requires_files() {
        assert!(Cli::try_parse_from(["ragway", "ask", "question"]).is_err());
    }

    #[tokio::test]
    async fn models_lists_offline_backend() {
        let output = run_offline(&["models"]).await.unwrap();
        assert!(output.contains("offline"));
        assert!(output.contains("mock-embed"));

        let json = run_offline(&["models", "--json"]).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn chat_prints_reply() {
        let output = run_offline(&["chat", "hello"]).await.unwrap();
        assert_eq!(output, "mock response\n");

        let streamed = run_offline(&["chat", "hello", "--stream"]).await.unwrap();
        assert_eq!(streamed, "mock response\n");
    }

    #[tokio::test]
    async fn search_ranks_file_passages() {
        let dir = scratch_dir("search");
        let notes = write_file(
            &dir,
            "notes.md",
            "Tokio runs async tasks.\n\nPostgres stores rows.\n\nTokio timers fire later.",
        );

        let output = run_offline(&[
            "search", "tokio tasks", "-f", &notes, "--chunk-size", "30", "--chunk-overlap", "0",
        ])
        .await
        .unwrap();

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(" 1."));
        assert!(lines[0].contains("Tokio runs async tasks."));
        assert!(lines.iter().all(|line| line.contains("notes.md#")));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn ask_cites_sources() {
        let dir = scratch_dir("ask");
        let notes = write_file(&dir, "notes.md", "Rust has no garbage collector.");
        let empty = write_file(&dir, "empty.md", "   ");

        let output = run_offline(&["ask", "does rust have a gc?", "-f", &notes, &empty]).await.unwrap();

        assert!(output.starts_with("mock response\n"));
        assert!(output.contains("[Source 1]"));
        assert!(output.contains("notes.md"));
        assert!(!output.contains("empty.md"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn only_empty_files_is_an_error() {
        let dir = scratch_dir("empty");
        let empty = write_file(&dir, "empty.md", "\n\n");

        let err = run_offline(&["search", "anything", "-f", &empty]).await.unwrap_err();

        assert!(err.to_string().contains("none of the given files"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn invalid_chunking_is_rejected() {
        let dir = scratch_dir("config");
        let notes = write_file(&dir, "notes.md", "text");

        let result = run_offline(&[
            "search", "text", "-f", &notes, "--chunk-size", "10", "--chunk-overlap", "10",
        ])
        .await;

        assert!(result.is_err());
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn trace_lists_tenant_spans() {
        let ctx = request_context(None);
        let spans = SpanStore::new();
        spans.record(
            ctx.tenant_id().to_string(),
            ragway_telemetry::SpanRecord {
                span_id: "1".into(),
                parent_id: None,
                name: "rag.search".into(),
                target: "ragway_rag::pipeline".into(),
                start_time: 0,
                end_time: 2_500_000,
                attributes: HashMap::new(),
            },
        );
        let mut out = Vec::new();

        print_trace(&ctx, Some(&spans), &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("rag.search"));
        assert!(text.contains("2.5 ms"));
    }
}
