use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relume_contracts::prompts::{presets_for, JsonFileStore, MemoryPromptStore};
use relume_contracts::session::{ComparisonMode, PromptMode};
use relume_engine::{
    build_data_url, decode_data_url, extension_for_mime, mime_for_path, upscale_2x,
    DecodingInspector, DryRunModel, GeminiClient, GenerationOutcome, RestorationModel,
    SessionOrchestrator, SystemClock,
};

#[derive(Debug, Parser)]
#[command(name = "relume", version, about = "Photo restoration sessions against the Gemini image model")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive restoration session.
    Session(SessionArgs),
    /// One-shot restoration of a single image.
    Restore(RestoreArgs),
    /// List the preset prompts for both modes.
    Presets,
}

#[derive(Debug, Parser)]
struct SessionArgs {
    /// Directory for events, saved results, and the custom prompt store.
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Custom prompt store; defaults to <out>/custom_prompts.json.
    #[arg(long)]
    prompts: Option<PathBuf>,
    /// Use the offline stand-in model instead of the Gemini API.
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Parser)]
struct RestoreArgs {
    #[arg(long)]
    image: PathBuf,
    /// Defaults to the first retouch preset.
    #[arg(long)]
    prompt: Option<String>,
    /// Directory the restored image (and events) land in.
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    /// Also write a 2x upscaled copy.
    #[arg(long)]
    upscale: bool,
    #[arg(long)]
    dry_run: bool,
}

fn main() {
    env_logger::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("relume error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Session(args) => run_session(args),
        Command::Restore(args) => run_restore(args),
        Command::Presets => {
            print_presets();
            Ok(0)
        }
    }
}

fn resolve_model(dry_run: bool) -> Result<Box<dyn RestorationModel>> {
    if dry_run {
        return Ok(Box::new(DryRunModel));
    }
    Ok(Box::new(GeminiClient::from_env()?))
}

fn run_restore(args: RestoreArgs) -> Result<i32> {
    std::fs::create_dir_all(&args.out)?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let mut session = SessionOrchestrator::new(
        events_path,
        Box::new(MemoryPromptStore::new()),
        Box::new(DecodingInspector),
        Arc::new(SystemClock),
    )?;
    let model = resolve_model(args.dry_run)?;

    let (data_url, mime_type) = load_image_file(&args.image)?;
    session.upload_image(&data_url, &mime_type)?;
    if let Some(prompt) = args.prompt {
        session.set_prompt(prompt);
    }

    match session.request_generation(model.as_ref())? {
        GenerationOutcome::Completed(item) => {
            let path = write_result(&args.out, &item.id, "", &item.image_url)?;
            println!("Restored image written to {}", path.display());
            if args.upscale {
                let upscaled = upscale_2x(&item.image_url)?;
                let path = write_result(&args.out, &item.id, "-2x", &upscaled.image_url)?;
                println!(
                    "Upscaled {}x{} copy written to {}",
                    upscaled.width,
                    upscaled.height,
                    path.display()
                );
            }
            Ok(0)
        }
        GenerationOutcome::Failed(err) => {
            eprintln!("{err}");
            Ok(1)
        }
        GenerationOutcome::Skipped => {
            eprintln!("Generation request was rejected.");
            Ok(1)
        }
    }
}

fn run_session(args: SessionArgs) -> Result<i32> {
    std::fs::create_dir_all(&args.out)?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let prompts_path = args
        .prompts
        .clone()
        .unwrap_or_else(|| args.out.join("custom_prompts.json"));
    let mut session = SessionOrchestrator::new(
        events_path,
        Box::new(JsonFileStore::new(prompts_path)),
        Box::new(DecodingInspector),
        Arc::new(SystemClock),
    )?;
    let model = resolve_model(args.dry_run)?;

    println!("relume session started. Type help for commands.");

    let stdin = io::stdin();
    let mut line = String::new();
    loop {
        let remaining = session.tick();
        if remaining > 0 {
            print!("[cooldown {remaining}s] > ");
        } else {
            print!("> ");
        }
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        let (command, rest) = match input.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (input, ""),
        };

        match command {
            "help" => print_help(),
            "quit" | "exit" => break,
            "open" => {
                if rest.is_empty() {
                    println!("usage: open <path>");
                    continue;
                }
                match load_image_file(Path::new(rest)) {
                    Ok((data_url, mime_type)) => {
                        session.upload_image(&data_url, &mime_type)?;
                        println!("Loaded {rest}.");
                        print_status(&session);
                    }
                    Err(err) => println!("could not open {rest}: {err:#}"),
                }
            }
            "prompt" => {
                if rest.is_empty() {
                    println!("prompt: {}", session.prompt());
                } else {
                    session.set_prompt(rest);
                }
            }
            "preset" => match rest.parse::<usize>().ok().and_then(|idx| {
                presets_for(session.prompt_mode()).get(idx.wrapping_sub(1))
            }) {
                Some(preset) => {
                    session.set_prompt(preset.prompt);
                    println!("prompt: {}", session.prompt());
                }
                None => println!("usage: preset <number> (see presets)"),
            },
            "presets" => {
                for (idx, preset) in presets_for(session.prompt_mode()).iter().enumerate() {
                    println!("{:2}. {}", idx + 1, preset.prompt);
                }
            }
            "mode" => match PromptMode::parse(rest) {
                Some(mode) => session.set_prompt_mode(mode),
                None => println!("usage: mode <retouch|reimagine>"),
            },
            "view" => match ComparisonMode::parse(rest) {
                Some(mode) => session.set_comparison_mode(mode),
                None => println!("usage: view <side|slider|single>"),
            },
            "restore" => match session.request_generation(model.as_ref())? {
                GenerationOutcome::Completed(item) => {
                    println!("New result {}.", item.id);
                    print_status(&session);
                }
                GenerationOutcome::Failed(err) => println!("{err}"),
                GenerationOutcome::Skipped => {
                    let remaining = session.tick();
                    if remaining > 0 {
                        println!("Quota cooldown active; {remaining}s remaining.");
                    } else if !session.has_image() {
                        println!("No image loaded; use open <path> first.");
                    } else {
                        println!("A generation is already in flight.");
                    }
                }
            },
            "history" => {
                if session.results().is_empty() {
                    println!("No results yet.");
                }
                let selected = session.selected_result().map(|item| item.id.clone());
                for item in session.results() {
                    let marker = if selected.as_deref() == Some(item.id.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{marker} {}  {}", item.id, item.prompt);
                }
            }
            "select" => {
                if !session.select_for_view(rest)? {
                    println!("unknown result id: {rest}");
                } else {
                    print_status(&session);
                }
            }
            "use" => {
                if !session.use_result_as_source(rest)? {
                    println!("unknown result id: {rest}");
                } else {
                    println!("Next generation starts from {rest} (mode reimagine).");
                }
            }
            "original" => {
                session.reset_to_original()?;
                print_status(&session);
            }
            "edit" => {
                if rest.is_empty() {
                    println!("usage: edit <path-to-edited-image>");
                    continue;
                }
                match load_image_file(Path::new(rest)) {
                    Ok((data_url, mime_type)) => {
                        let item = session.record_edit(&data_url, &mime_type)?;
                        println!("Edit recorded as {}.", item.id);
                    }
                    Err(err) => println!("could not open {rest}: {err:#}"),
                }
            }
            "add-prompt" => {
                if session.add_custom_prompt(rest) {
                    println!("Saved.");
                } else {
                    println!("Rejected: empty, duplicate, or a preset.");
                }
            }
            "del-prompt" => {
                if !session.delete_custom_prompt(rest) {
                    println!("No such custom prompt.");
                }
            }
            "my-prompts" => {
                for prompt in session.custom_prompts() {
                    println!("- {prompt}");
                }
            }
            "save" => match parse_id_and_path(rest) {
                Some((id, path)) => save_result(&session, &args.out, id, path, false)?,
                None => println!("usage: save <id> [path]"),
            },
            "upscale" => match parse_id_and_path(rest) {
                Some((id, path)) => save_result(&session, &args.out, id, path, true)?,
                None => println!("usage: upscale <id> [path]"),
            },
            "status" => print_status(&session),
            "clear" => {
                session.clear_all()?;
                println!("Session cleared.");
            }
            _ => println!("unknown command: {command} (try help)"),
        }
    }

    Ok(0)
}

fn print_presets() {
    for mode in [PromptMode::Retouch, PromptMode::Reimagine] {
        println!("{} presets:", mode.as_str());
        for (idx, preset) in presets_for(mode).iter().enumerate() {
            println!("{:2}. {}", idx + 1, preset.prompt);
        }
    }
}

fn print_help() {
    println!("commands:");
    println!("  open <path>          load an image and start a fresh session");
    println!("  prompt [text]        show or set the prompt");
    println!("  presets / preset <n> list or pick a preset for the current mode");
    println!("  mode <retouch|reimagine>");
    println!("  view <side|slider|single>");
    println!("  restore              send the current image and prompt to the model");
    println!("  history              list results, newest first");
    println!("  select <id>          choose the result to compare");
    println!("  use <id>             make a result the next generation's input");
    println!("  original             go back to the uploaded image");
    println!("  edit <path>          record an externally edited image as a result");
    println!("  add-prompt / del-prompt / my-prompts   manage custom prompts");
    println!("  save <id> [path]     write a result to disk");
    println!("  upscale <id> [path]  write a 2x upscaled copy");
    println!("  status / clear / quit");
}

fn print_status(session: &SessionOrchestrator) {
    println!(
        "mode {} | view {} | prompt: {}",
        session.prompt_mode().as_str(),
        session.comparison_mode().as_str(),
        session.prompt()
    );
    if let Some(item) = session.selected_result() {
        let dims = session
            .image_dimensions()
            .map(|dims| format!("{}x{}", dims.width, dims.height))
            .unwrap_or_else(|| "?".to_string());
        println!("selected {} ({}) {dims}", item.id, item.prompt);
    }
    if let Some(error) = session.error() {
        println!("error: {error}");
    }
}

fn parse_id_and_path(rest: &str) -> Option<(&str, Option<&str>)> {
    let mut parts = rest.split_whitespace();
    let id = parts.next()?;
    Some((id, parts.next()))
}

fn save_result(
    session: &SessionOrchestrator,
    out_dir: &Path,
    id: &str,
    path: Option<&str>,
    upscale: bool,
) -> Result<()> {
    let Some(item) = session.result(id) else {
        println!("unknown result id: {id}");
        return Ok(());
    };
    let (suffix, image_url) = if upscale {
        ("-2x", upscale_2x(&item.image_url)?.image_url)
    } else {
        ("", item.image_url.clone())
    };
    let (mime_type, bytes) = decode_data_url(&image_url)?;
    let target = match path {
        Some(path) => PathBuf::from(path),
        None => out_dir.join(format!(
            "restored-{id}{suffix}.{}",
            extension_for_mime(&mime_type)
        )),
    };
    std::fs::write(&target, bytes)
        .with_context(|| format!("failed to write {}", target.display()))?;
    println!("Wrote {}", target.display());
    Ok(())
}

fn write_result(out_dir: &Path, id: &str, suffix: &str, image_url: &str) -> Result<PathBuf> {
    let (mime_type, bytes) = decode_data_url(image_url)?;
    let path = out_dir.join(format!(
        "restored-{id}{suffix}.{}",
        extension_for_mime(&mime_type)
    ));
    std::fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn load_image_file(path: &Path) -> Result<(String, String)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let mime_type = mime_for_path(path);
    Ok((build_data_url(mime_type, &bytes), mime_type.to_string()))
}
