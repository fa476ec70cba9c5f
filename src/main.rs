use std::fs::File;
use std::io::{self, Read, Write};

use anyhow::{Context, bail};
use clap::Parser;
use llawk_llm::LlmBackend;
use llawk_llm::registry;
use llawk_llm::request::{OutputFormat, Request};
use llawk_llm::schema;
use tokio_stream::StreamExt;

const AFTER_HELP: &str = "\
Environment variables:
  Common:
    LLAWK_MODEL        Default model to use.
  for OpenAI models:
    OPENAI_API_KEY     API key.
    OPENAI_ORG_ID      Organization ID.
  for Google models:
    GEMINI_API_KEY     API key.
  for Anthropic models:
    ANTHROPIC_API_KEY  API key.
  for Ollama models:
    OLLAMA_HOST        Hostname of the Ollama API.

Examples:
  $ llawk -i en.txt -o ja.txt 'Translate it into Japanese'
  $ cat comments.txt | llawk -f json 'Guess the sentiment for each line. Output a JSON object with an array named \"sentiments\".'
";

#[derive(Debug, Parser)]
#[command(
    name = "llawk",
    about = "A CLI text operation tool using Large Language Models",
    after_help = AFTER_HELP
)]
struct Cli {
    /// Operation to apply to the input.
    #[arg(value_name = "INSTRUCT")]
    instruct: Option<String>,

    /// Input file. Use - for stdin.
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Output file. Use - for stdout.
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Output format. "text", "json", or a JSON Schema string.
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Model to use. Use "list" to list available models.
    #[arg(short, long, default_value_t = registry::default_model())]
    model: String,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let is_usage_error = e.use_stderr();
            let _ = e.print();
            if is_usage_error {
                std::process::exit(1);
            }
            return Ok(());
        }
    };

    if cli.model == "list" {
        print_catalog(&mut io::stdout().lock(), &registry::default_model())?;
        return Ok(());
    }

    let Some(instruct) = cli.instruct else {
        bail!("expected exactly one INSTRUCT argument (see --help)");
    };

    let format = parse_format(&cli.format)?;

    let entry = registry::resolve(&cli.model)?;
    let backend = entry.dial(&cli.model)?;

    let (input, input_name) = read_input(&cli.input)?;
    let (output, output_name) = open_output(&cli.output)?;

    let request = Request {
        instruct,
        input,
        input_name,
        format,
        output_name,
        verbose: cli.verbose,
    };

    if cli.verbose {
        eprintln!("Model: {}", cli.model);
        eprintln!("--- system ---");
        eprintln!("{}", request.system_prompt());
        eprintln!("--- user (input: {:?}) ---", request.input_name);
        eprintln!("{}", request.user_prompt());
        if request.output_name == "<stdout>" {
            eprintln!("--- result (output: {:?}) ---", request.output_name);
        }
    }

    tracing::debug!(model = entry.name, backend = backend.name(), "invoking");
    run(&backend, &request, output).await
}

/// Dispatch the request and copy the response stream to the sink, normalizing
/// the trailing newline.
async fn run<B, W>(backend: &B, request: &Request, output: W) -> anyhow::Result<()>
where
    B: LlmBackend,
    W: Write,
{
    let mut sink = NewlineTracker::new(output);
    copy_stream(backend, request, &mut sink).await?;
    if !sink.has_newline {
        writeln!(sink).context("failed to write output")?;
    }
    Ok(())
}

async fn copy_stream<B, W>(
    backend: &B,
    request: &Request,
    sink: &mut NewlineTracker<W>,
) -> anyhow::Result<()>
where
    B: LlmBackend,
    W: Write,
{
    let mut stream = backend.invoke(request).await?;
    while let Some(fragment) = stream.next().await {
        let fragment = fragment?;
        sink.write_all(fragment.as_bytes())
            .context("failed to write output")?;
        sink.flush().context("failed to flush output")?;
    }
    Ok(())
}

fn parse_format(raw: &str) -> anyhow::Result<OutputFormat> {
    match raw {
        "text" => Ok(OutputFormat::Text),
        "json" => Ok(OutputFormat::Json),
        other if schema::is_schema_document(other) => {
            Ok(OutputFormat::JsonSchema(other.to_owned()))
        }
        other => bail!("unsupported format: {other}"),
    }
}

fn read_input(path: &str) -> anyhow::Result<(String, String)> {
    if path == "-" || path.is_empty() {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        Ok((buf, "<stdin>".to_owned()))
    } else {
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {path}"))?;
        Ok((input, path.to_owned()))
    }
}

fn open_output(path: &str) -> anyhow::Result<(Box<dyn Write>, String)> {
    if path == "-" || path.is_empty() {
        Ok((Box::new(io::stdout()), "<stdout>".to_owned()))
    } else {
        let file =
            File::create(path).with_context(|| format!("failed to create output file {path}"))?;
        Ok((Box::new(file), path.to_owned()))
    }
}

fn print_catalog(out: &mut impl Write, default_model: &str) -> anyhow::Result<()> {
    writeln!(out, "Available models:")?;
    for entry in registry::MODELS {
        if entry.name == default_model {
            writeln!(out, "  {} (default)", entry.name)?;
        } else {
            writeln!(out, "  {}", entry.name)?;
        }
    }
    Ok(())
}

/// Tracks whether the last byte forwarded to the inner writer was a newline.
struct NewlineTracker<W> {
    inner: W,
    has_newline: bool,
}

impl<W: Write> NewlineTracker<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            has_newline: false,
        }
    }
}

impl<W: Write> Write for NewlineTracker<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(last) = buf.last() {
            self.has_newline = *last == b'\n';
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

fn init_subscriber() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
