//! Export a workflow JSON file to an image.
//!
//! Usage:
//!   cargo run --release --bin export_workflow -- workflow.json
//!   cargo run --release --bin export_workflow -- workflow.json --output out.png \
//!       --background transparent --padding 50 --select 3,4 --scope-opacity 20
//!
//! Settings may also be loaded from a JSON file (`--settings prefs.json`) using
//! the same keys the host persists; command-line flags override them.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use serde_json::{Map, Value};
use workflow_image_export::config::ExportSettings;
use workflow_image_export::export::Exporter;
use workflow_image_export::overlay::DecodingResolver;
use workflow_image_export::scene::{LiveState, SceneSnapshot};

struct CliConfig {
    input: Option<PathBuf>,
    output: PathBuf,
    settings_file: Option<PathBuf>,
    live_file: Option<PathBuf>,
    media_root: Option<PathBuf>,
    overrides: Map<String, Value>,
    selected: Vec<i64>,
    scope_opacity: Option<u8>,
    include_grid: bool,
    include_overlays: bool,
    quiet: bool,
}

impl CliConfig {
    fn from_args() -> Result<Self, String> {
        let args: Vec<String> = std::env::args().collect();
        let mut config = Self {
            input: None,
            output: PathBuf::from("workflow.png"),
            settings_file: None,
            live_file: None,
            media_root: None,
            overrides: Map::new(),
            selected: Vec::new(),
            scope_opacity: None,
            include_grid: true,
            include_overlays: true,
            quiet: false,
        };

        let mut i = 1;
        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || -> Result<String, String> {
                i += 1;
                args.get(i).cloned().ok_or_else(|| format!("{} needs a value", flag))
            };
            match flag {
                "--output" | "-o" => config.output = PathBuf::from(value()?),
                "--settings" => config.settings_file = Some(PathBuf::from(value()?)),
                "--live" => config.live_file = Some(PathBuf::from(value()?)),
                "--media-root" => config.media_root = Some(PathBuf::from(value()?)),
                "--format" => set(&mut config.overrides, "format", value()?),
                "--background" => set(&mut config.overrides, "background", value()?),
                "--solid-color" => set(&mut config.overrides, "solidColor", value()?),
                "--padding" => set(&mut config.overrides, "padding", value()?),
                "--resolution" => set(&mut config.overrides, "outputResolution", value()?),
                "--max-long-edge" => set(&mut config.overrides, "maxLongEdge", value()?),
                "--exceed" => set(&mut config.overrides, "exceedMode", value()?),
                "--compression" => set(&mut config.overrides, "pngCompression", value()?),
                "--node-opacity" => set(&mut config.overrides, "nodeOpacity", value()?),
                "--no-embed" => {
                    config.overrides.insert("embedWorkflow".into(), Value::Bool(false));
                },
                "--select" => {
                    let raw = value()?;
                    for id in raw.split(',').filter(|s| !s.trim().is_empty()) {
                        let id = id
                            .trim()
                            .parse()
                            .map_err(|_| format!("invalid node id {:?}", id))?;
                        config.selected.push(id);
                    }
                },
                "--scope-opacity" => {
                    let raw = value()?;
                    let v: u32 = raw
                        .parse()
                        .map_err(|_| format!("invalid scope opacity {:?}", raw))?;
                    config.scope_opacity = Some(v.min(100) as u8);
                },
                "--no-grid" => config.include_grid = false,
                "--no-overlays" => config.include_overlays = false,
                "--quiet" | "-q" => config.quiet = true,
                "--help" | "-h" => return Err(usage()),
                other if other.starts_with('-') => {
                    return Err(format!("unknown option {}\n\n{}", other, usage()));
                },
                other => config.input = Some(PathBuf::from(other)),
            }
            i += 1;
        }
        Ok(config)
    }
}

fn set(overrides: &mut Map<String, Value>, key: &str, value: String) {
    overrides.insert(key.to_string(), Value::String(value));
}

fn usage() -> String {
    "usage: export_workflow <workflow.json> [--output FILE] [--settings FILE] [--live FILE]\n\
     \x20      [--media-root DIR] [--format png|webp] [--background ui|transparent|solid]\n\
     \x20      [--solid-color HEX] [--padding N] [--resolution auto|100%|200%]\n\
     \x20      [--max-long-edge N] [--exceed tile|downscale] [--compression 0-9]\n\
     \x20      [--node-opacity 0-100] [--no-embed] [--select ID,ID] [--scope-opacity 0-100]\n\
     \x20      [--no-grid] [--no-overlays] [--quiet]"
        .to_string()
}

fn load_settings(config: &CliConfig) -> Result<ExportSettings, String> {
    let mut raw = match &config.settings_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str::<Value>(&text)
                .map_err(|e| format!("invalid settings {}: {}", path.display(), e))?
        },
        None => Value::Object(Map::new()),
    };
    if let Value::Object(map) = &mut raw {
        map.extend(config.overrides.clone());
    }
    Ok(ExportSettings::from_value(&raw))
}

fn run(config: CliConfig) -> Result<(), String> {
    let input = config.input.clone().ok_or_else(usage)?;
    let json = fs::read_to_string(&input)
        .map_err(|e| format!("cannot read {}: {}", input.display(), e))?;
    let mut snapshot = SceneSnapshot::from_json_str(&json).map_err(|e| e.to_string())?;
    if let Some(path) = &config.live_file {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        let live: LiveState = serde_json::from_str(&text)
            .map_err(|e| format!("invalid live state {}: {}", path.display(), e))?;
        snapshot = snapshot.with_live(live);
    }

    let settings = load_settings(&config)?;
    let mut request = settings.to_request().with_grid(config.include_grid);
    request.include_overlays = config.include_overlays;
    if !config.selected.is_empty() {
        let opacity = config.scope_opacity.unwrap_or(request.scope_opacity);
        request = request.with_selection(config.selected.clone(), opacity);
    }

    let mut resolver = DecodingResolver::new();
    if let Some(root) = &config.media_root {
        resolver = resolver.with_media_root(root);
    }
    let mut exporter = Exporter::new().with_resolver(resolver);
    if !config.quiet {
        exporter = exporter.with_progress(|p| eprint!("\rrendering {:3}%", p.percent()));
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))?;

    let start = Instant::now();
    let output = runtime
        .block_on(exporter.export(&request, &snapshot, Vec::new()))
        .map_err(|e| format!("export failed [{}]: {}", e.code(), e))?;
    if !config.quiet {
        eprintln!();
    }

    fs::write(&config.output, &output.bytes)
        .map_err(|e| format!("cannot write {}: {}", config.output.display(), e))?;

    if !config.quiet {
        println!(
            "Wrote {} ({}x{} {}, {} bytes) in {:.2}s",
            config.output.display(),
            output.width,
            output.height,
            output.format.as_str(),
            output.bytes.len(),
            start.elapsed().as_secs_f64()
        );
    }
    for warning in &output.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    let result = CliConfig::from_args().and_then(run);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        },
    }
}
