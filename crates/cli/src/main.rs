use std::{io::Write, path::PathBuf, sync::Arc};

use {
    anyhow::{Context, bail},
    clap::{Parser, Subcommand},
    futures::StreamExt,
    lore_agents::{ChatEvent, ChatRequest, ChatResponse, ChatService, providers::OpenAiProvider},
    lore_config::LoreConfig,
    lore_memory::{
        KnowledgeBase, MemoryType, NewMemory, embeddings_openai::OpenAiEmbeddingProvider,
    },
    serde_json::json,
    tokio::io::{AsyncBufReadExt, BufReader},
    tracing::{debug, info},
    tracing_subscriber::EnvFilter,
};

#[derive(Parser)]
#[command(
    name = "lore",
    about = "Personal knowledge base with retrieval-augmented chat",
    version
)]
struct Cli {
    /// Config file (.toml, .yaml or .json). Discovered when omitted.
    #[arg(long, global = true, env = "LORE_CONFIG")]
    config: Option<PathBuf>,

    /// User whose memories and history are used.
    #[arg(long, global = true, env = "LORE_USER", default_value = "default")]
    user: String,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index markdown/text files or directories.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Inspect or remove indexed passages.
    Docs {
        #[command(subcommand)]
        action: DocsAction,
    },
    /// Semantic search over indexed passages.
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Store a memory for the current user.
    Remember {
        content: String,
        /// fact, preference, event or any custom label.
        #[arg(long = "type", default_value = "fact")]
        memory_type: String,
        #[arg(long)]
        importance: Option<f32>,
    },
    /// List memories, or rank them against a query.
    Memories {
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete a memory by id.
    Forget { id: String },
    /// Ask a question. Starts an interactive session when no message is given.
    Chat {
        message: Option<String>,
        #[arg(long)]
        stream: bool,
        #[arg(long)]
        no_rag: bool,
        #[arg(long)]
        no_memory: bool,
    },
    /// Show recent conversation history.
    History {
        /// Number of exchanges to show.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Delete the user's history instead.
        #[arg(long)]
        clear: bool,
    },
    /// Knowledge base and provider summary.
    Status,
}

#[derive(Subcommand)]
enum DocsAction {
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn api_key(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

async fn open_knowledge_base(config: &LoreConfig) -> anyhow::Result<Arc<KnowledgeBase>> {
    let embedder = OpenAiEmbeddingProvider::from_config(
        &config.embeddings,
        api_key(&config.embeddings.api_key_env),
    );
    let kb = KnowledgeBase::open(config, Arc::new(embedder)).await?;
    Ok(Arc::new(kb))
}

fn chat_service(kb: Arc<KnowledgeBase>, config: &LoreConfig) -> anyhow::Result<ChatService> {
    let llm = OpenAiProvider::from_config(&config.llm, api_key(&config.llm.api_key_env))?;
    info!(model = %config.llm.model, "chat provider ready");
    Ok(ChatService::new(kb, Arc::new(llm), config))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn preview(text: &str, max: usize) -> String {
    let line = text.replace('\n', " ");
    match line.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &line[..cut]),
        None => line,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = lore_config::load_config(cli.config.as_deref())?;
    debug!(backend = ?config.storage.backend, "config loaded");
    let kb = open_knowledge_base(&config).await?;

    run(cli, config, kb).await
}

async fn run(cli: Cli, config: LoreConfig, kb: Arc<KnowledgeBase>) -> anyhow::Result<()> {
    let user = cli.user.as_str();
    match cli.command {
        Commands::Ingest { paths } => {
            let report = kb.ingest_paths(paths.as_slice()).await?;
            if cli.json {
                return print_json(&report);
            }
            println!(
                "ingested {} file(s) into {} chunk(s), {} skipped",
                report.ingest.documents, report.ingest.chunks, report.ingest.skipped
            );
            for path in &report.unreadable {
                println!("  unreadable: {path}");
            }
        },
        Commands::Docs { action } => match action {
            DocsAction::List { limit } => {
                let docs = kb.list_documents(limit).await?;
                if cli.json {
                    return print_json(&docs);
                }
                for doc in docs {
                    let source = doc
                        .metadata
                        .get("filename")
                        .and_then(|v| v.as_str())
                        .unwrap_or("-");
                    println!("{}  {:<24}  {}", doc.id, source, preview(&doc.text, 60));
                }
            },
            DocsAction::Delete { ids } => {
                let removed = kb.delete_documents(&ids).await?;
                if cli.json {
                    return print_json(&json!({ "deleted": removed }));
                }
                println!("deleted {removed} passage(s)");
            },
        },
        Commands::Search {
            query,
            top_k,
            threshold,
        } => {
            let results = kb.search(&query, top_k, threshold).await?;
            if cli.json {
                return print_json(&results);
            }
            if results.is_empty() {
                println!("no passages above the similarity threshold");
            }
            for (i, r) in results.iter().enumerate() {
                println!("{}. [{:.3}] {}", i + 1, r.similarity, preview(&r.text, 100));
            }
        },
        Commands::Remember {
            content,
            memory_type,
            importance,
        } => {
            let mut memory = NewMemory::new(content).with_type(MemoryType::from(memory_type));
            if let Some(importance) = importance {
                memory = memory.with_importance(importance);
            }
            let record = kb.remember(user, memory).await?;
            if cli.json {
                return print_json(&record);
            }
            println!("remembered {} ({})", record.id, record.memory_type);
        },
        Commands::Memories { query, limit } => match query {
            Some(query) => {
                let ranked = kb.rank_memories(user, &query, limit).await?;
                if cli.json {
                    return print_json(&ranked);
                }
                for m in ranked {
                    println!(
                        "[{:.3}] {}  {} (importance {:.2})",
                        m.score, m.memory.id, m.memory.content, m.memory.importance
                    );
                }
            },
            None => {
                let limit = limit.unwrap_or(config.memory.list_limit);
                let records = kb.list_memories(user, limit).await?;
                if cli.json {
                    return print_json(&records);
                }
                for r in records {
                    println!(
                        "{}  {:<10}  {}  {}",
                        r.id,
                        r.memory_type,
                        r.created_at.format("%Y-%m-%d %H:%M"),
                        r.content
                    );
                }
            },
        },
        Commands::Forget { id } => {
            let removed = kb.forget(user, &id).await?;
            if cli.json {
                return print_json(&json!({ "deleted": removed }));
            }
            if !removed {
                bail!("no memory {id} for user {user}");
            }
            println!("forgot {id}");
        },
        Commands::Chat {
            message,
            stream,
            no_rag,
            no_memory,
        } => {
            let service = chat_service(Arc::clone(&kb), &config)?;
            let options = ChatOptions {
                user,
                stream,
                json: cli.json,
                use_rag: no_rag.then_some(false),
                use_memory: no_memory.then_some(false),
            };
            match message {
                Some(message) => options.ask(&service, message).await?,
                None => interactive(&service, &options).await?,
            }
        },
        Commands::History { limit, clear } => {
            if clear {
                let removed = kb.conversations().clear(user).await?;
                if cli.json {
                    return print_json(&json!({ "cleared": removed }));
                }
                println!("cleared {removed} exchange(s)");
                return Ok(());
            }
            let turns = kb.conversations().recent(user, limit).await?;
            if cli.json {
                return print_json(&turns);
            }
            for turn in turns {
                println!(
                    "{} {:>9}: {}",
                    turn.timestamp.format("%Y-%m-%d %H:%M"),
                    turn.role.as_str(),
                    turn.content
                );
            }
        },
        Commands::Status => {
            let status = kb.status().await?;
            if cli.json {
                return print_json(&json!({
                    "knowledge_base": status,
                    "storage": config.storage.backend,
                    "llm": { "provider": config.llm.provider, "model": config.llm.model },
                }));
            }
            println!("passages:   {}", status.total_passages);
            println!(
                "embeddings: {} ({}, {} dims)",
                status.embedding_model, status.provider_key, status.dimensions
            );
            println!("llm:        {} ({})", config.llm.model, config.llm.provider);
            println!("storage:    {:?}", config.storage.backend);
        },
    }
    Ok(())
}

struct ChatOptions<'a> {
    user: &'a str,
    stream: bool,
    json: bool,
    use_rag: Option<bool>,
    use_memory: Option<bool>,
}

impl ChatOptions<'_> {
    fn request(&self, message: String) -> ChatRequest {
        let mut request = ChatRequest::new(self.user, message);
        request.use_rag = self.use_rag;
        request.use_memory = self.use_memory;
        request
    }

    async fn ask(&self, service: &ChatService, message: String) -> anyhow::Result<()> {
        let request = self.request(message);
        if self.stream {
            return self.ask_streaming(service, request).await;
        }
        let response = service.chat(&request).await?;
        if self.json {
            return print_json(&response);
        }
        print_response(&response);
        Ok(())
    }

    async fn ask_streaming(&self, service: &ChatService, request: ChatRequest) -> anyhow::Result<()> {
        let mut events = service.chat_stream(request);
        let mut stdout = std::io::stdout();
        while let Some(event) = events.next().await {
            if self.json {
                println!("{}", serde_json::to_string(&event)?);
                if let ChatEvent::Error { message } = event {
                    bail!(message);
                }
                continue;
            }
            match event {
                ChatEvent::Metadata { degraded, .. } if !degraded.is_empty() => {
                    eprintln!("(answering without: {degraded:?})");
                },
                ChatEvent::Metadata { .. } => {},
                ChatEvent::Delta { content } => {
                    print!("{content}");
                    stdout.flush()?;
                },
                ChatEvent::Done { history_saved, .. } => {
                    println!();
                    if !history_saved {
                        eprintln!("(this exchange was not saved to history)");
                    }
                },
                ChatEvent::Error { message } => {
                    println!();
                    bail!(message);
                },
            }
        }
        Ok(())
    }
}

fn print_response(response: &ChatResponse) {
    println!("{}", response.response);
    if !response.sources.is_empty() {
        println!();
        for (i, source) in response.sources.iter().enumerate() {
            let name = source
                .metadata
                .get("filename")
                .and_then(|v| v.as_str())
                .unwrap_or("passage");
            println!("[{}] {name} ({:.3})", i + 1, source.score);
        }
    }
    if !response.degraded.is_empty() {
        eprintln!("(answered without: {:?})", response.degraded);
    }
    if !response.history_saved {
        eprintln!("(this exchange was not saved to history)");
    }
}

async fn interactive(service: &ChatService, options: &ChatOptions<'_>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await.context("reading stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        if let Err(e) = options.ask(service, line.to_string()).await {
            eprintln!("error: {e:#}");
        }
    }
    Ok(())
}
