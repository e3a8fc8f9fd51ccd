//! Record one or more movies and render them.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use goexport_capture_engine::Capture;
use goexport_common::clock::HostClock;
use goexport_common::config::AppConfig;
use goexport_common::params::{LayeredParams, ParamKey, ParamSource};
use goexport_common::shutdown::CleanupRegistry;
use goexport_export_flow::{ChromeDriverLauncher, ExportFlow, HttpProbe};
use goexport_project_model::resolution::AspectRatio;
use goexport_project_model::service::{service, visible_services, Identifier};

use crate::output::Reporter;
use crate::prompt::Prompter;

#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    /// Service key (see `goexport services`)
    #[arg(short, long)]
    pub service: Option<String>,

    /// Aspect ratio: 4:3, 14:9, 16:9 or 9:16
    #[arg(short, long)]
    pub aspect: Option<String>,

    /// Resolution label, e.g. 720p
    #[arg(short, long)]
    pub resolution: Option<String>,

    /// Movie identifier
    #[arg(short, long)]
    pub movie_id: Option<String>,

    /// Movie owner identifier
    #[arg(long)]
    pub owner_id: Option<String>,

    /// Keep raw recordings in a project folder instead of trimming and rendering
    #[arg(long)]
    pub no_auto_edit: bool,

    /// Final video path or folder
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Minutes to wait for playback to start (0 waits forever)
    #[arg(long)]
    pub load_timeout: Option<u64>,

    /// Minutes to wait for playback to finish (0 waits forever)
    #[arg(long)]
    pub completion_timeout: Option<u64>,

    /// Never prompt; export once, include the outro and print JSON lines
    #[arg(long)]
    pub no_input: bool,
}

/// Keys persisted as last-used after each successful cycle.
const REMEMBERED: [ParamKey; 6] = [
    ParamKey::Service,
    ParamKey::AspectRatio,
    ParamKey::Resolution,
    ParamKey::AutoEdit,
    ParamKey::MovieId,
    ParamKey::OwnerId,
];

pub async fn run(
    args: ExportArgs,
    config: AppConfig,
    config_path: PathBuf,
    cleanup: CleanupRegistry,
) -> anyhow::Result<()> {
    let prompter = Prompter::new(args.no_input);
    let out = Reporter::stdout(args.no_input);
    let mut params = params_from(&args, config.clone());

    let clock = HostClock::start();
    let capture = Capture::select(&config, clock.clone()).await;
    out.started(format!("Recording with {}", capture.kind()));

    let mut flow = ExportFlow::new(
        config.clone(),
        clock,
        capture,
        Arc::new(ChromeDriverLauncher::new(config)),
        Arc::new(HttpProbe::new()),
    )
    .with_cleanup(cleanup);

    let mut captured = 0usize;
    loop {
        fill_missing(&prompter, &mut params);
        if let Some(movie) = params.resolve(ParamKey::MovieId) {
            out.stage("exporting", format!("Exporting {movie}"));
        }

        match flow.run_cycle(&params).await {
            Ok(clip) => {
                captured += 1;
                out.captured(&clip);
                remember(&mut params, &config_path);
            }
            Err(e) if e.is_timeout() => out.skipped(e.to_string()),
            Err(e) => {
                out.error(e.to_string());
                return Err(e.into());
            }
        }

        if !prompter.confirm("Add another video?", false) {
            break;
        }
        flow.next_cycle();
        params.clear(ParamKey::MovieId);
        params.clear(ParamKey::OwnerId);
    }

    if captured == 0 {
        out.skipped("No movie was captured, nothing to render");
        return Ok(());
    }

    let include_outro = prompter.confirm("Include the outro?", true);
    out.stage("rendering", "Rendering video");
    let output = flow
        .finalize(include_outro, Some(out.progress_callback()))
        .map_err(|e| {
            out.error(e.to_string());
            e
        })?;
    out.completed(&output);
    Ok(())
}

fn params_from(args: &ExportArgs, config: AppConfig) -> LayeredParams {
    let mut params = LayeredParams::new(config);
    params
        .set_opt(ParamKey::Service, args.service.clone())
        .set_opt(ParamKey::AspectRatio, args.aspect.clone())
        .set_opt(ParamKey::Resolution, args.resolution.clone())
        .set_opt(ParamKey::MovieId, args.movie_id.clone())
        .set_opt(ParamKey::OwnerId, args.owner_id.clone())
        .set_opt(
            ParamKey::OutputPath,
            args.output.as_ref().map(|p| p.display().to_string()),
        )
        .set_opt(ParamKey::LoadTimeoutMinutes, args.load_timeout.map(|m| m.to_string()))
        .set_opt(
            ParamKey::CompletionTimeoutMinutes,
            args.completion_timeout.map(|m| m.to_string()),
        );
    if args.no_auto_edit {
        params.set(ParamKey::AutoEdit, "false");
    }
    params
}

/// Ask for whatever the flags and last-used values left open.
fn fill_missing(prompter: &Prompter, params: &mut LayeredParams) {
    if !prompter.is_interactive() {
        return;
    }

    if params.get_param(ParamKey::Service).is_none() {
        let services: Vec<_> = visible_services().collect();
        let labels: Vec<String> = services.iter().map(|s| format!("{} ({})", s.name, s.key)).collect();
        let last = params.get_config(ParamKey::Service);
        let default = services
            .iter()
            .position(|s| Some(s.key) == last.as_deref())
            .unwrap_or(0);
        if let Some(i) = prompter.choose("Service:", &labels, default) {
            params.set(ParamKey::Service, services[i].key);
        }
    }

    if params.get_param(ParamKey::AspectRatio).is_none() {
        let labels: Vec<String> = AspectRatio::ALL.iter().map(|a| a.to_string()).collect();
        let last = params.get_config(ParamKey::AspectRatio);
        let default = AspectRatio::ALL
            .iter()
            .position(|a| Some(a.as_str()) == last.as_deref())
            .unwrap_or_else(|| AspectRatio::ALL.iter().position(|a| *a == AspectRatio::DEFAULT).unwrap_or(0));
        if let Some(i) = prompter.choose("Aspect ratio:", &labels, default) {
            params.set(ParamKey::AspectRatio, AspectRatio::ALL[i].as_str());
        }
    }

    if params.get_param(ParamKey::Resolution).is_none() {
        let aspect = params
            .resolve(ParamKey::AspectRatio)
            .and_then(|a| a.parse::<AspectRatio>().ok())
            .unwrap_or(AspectRatio::DEFAULT);
        let labels: Vec<String> = aspect.resolutions().iter().map(|r| r.to_string()).collect();
        let last = params.get_config(ParamKey::Resolution);
        let default = aspect
            .resolutions()
            .iter()
            .position(|r| Some(r.label) == last.as_deref())
            .unwrap_or(0);
        if let Some(i) = prompter.choose("Resolution:", &labels, default) {
            params.set(ParamKey::Resolution, aspect.resolutions()[i].label);
        }
    }

    let Some(chosen) = params.resolve(ParamKey::Service).and_then(|k| service(&k).ok()) else {
        return;
    };
    for (id, key) in [
        (Identifier::MovieId, ParamKey::MovieId),
        (Identifier::OwnerId, ParamKey::OwnerId),
    ] {
        if chosen.requires(id) && params.get_param(key).is_none() {
            let last = params.get_config(key);
            if let Some(value) = prompter.ask(id.label(), last.as_deref()) {
                params.set(key, value);
            }
        }
    }
}

fn remember(params: &mut LayeredParams, config_path: &std::path::Path) {
    for key in REMEMBERED {
        if let Some(value) = params.resolve(key) {
            params.remember(key, &value);
        }
    }
    if let Err(e) = params.config().save_to(config_path) {
        tracing::warn!(path = %config_path.display(), error = %e, "Could not save last-used values");
    }
}
