// SPDX-License-Identifier: MIT OR Apache-2.0
//! coral - dataflow network runner
//!
//! Opens a network (the one given on the command line, the configured
//! startup network, or a built-in demo), plays its first playable node for
//! a few frames and logs what the network computes.
//!
//! ## Architecture
//!
//! The engine lives in `coral_graph`. This binary adds the application
//! layer on top of it: settings, the inspector field model and the
//! `coralIO` file format, all reached through an explicit `AppContext`.

use coral_app::inspector;
use coral_app::settings::SETTINGS_FILE_NAME;
use coral_app::{AppContext, Result, Settings};
use coral_graph::{AttributeId, NodeId};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in ["coral=debug", "coral_app=debug", "coral_graph=debug"] {
        match directive.parse() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring log directive {directive}: {e}"),
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn main() {
    init_tracing();
    tracing::info!("Starting coral v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load_or_default(Path::new(SETTINGS_FILE_NAME));
    if let Some(path) = std::env::args_os().nth(1) {
        settings.startup_network = Some(PathBuf::from(path));
    }

    if let Err(e) = run(settings) {
        tracing::error!("coral failed: {e}");
        std::process::exit(1);
    }
}

fn run(settings: Settings) -> Result<()> {
    let mut context = AppContext::startup(settings)?;
    if context.network.node_count() == 0 {
        context.build_demo()?;
    }

    let playable: Option<NodeId> = context
        .network
        .nodes()
        .find(|n| n.is_playable())
        .map(|n| n.id());
    if let Some(node) = playable {
        play(&mut context, node)?;
    } else {
        tracing::info!("Nothing to play");
    }

    let outputs: Vec<AttributeId> = context
        .network
        .top_level_nodes()
        .flat_map(|n| n.attributes().to_vec())
        .filter(|a| context.network.attribute(*a).is_some_and(|a| a.is_output()))
        .collect();
    for attribute in outputs {
        let name = context.network.attribute_full_name(attribute);
        match context.network.value(attribute) {
            Ok(value) => tracing::info!(attribute = %name, ?value, "Result"),
            Err(e) => tracing::warn!(attribute = %name, "Could not evaluate: {e}"),
        }
    }
    Ok(())
}

fn play(context: &mut AppContext, node: NodeId) -> Result<()> {
    let inspector = context.inspect(node)?;
    for field in inspector.fields() {
        tracing::debug!(
            field = %field.label,
            kind = ?field.kind,
            editable = field.editable,
            "Inspector field"
        );
    }

    let rate = context.settings.playback.frames_per_second.max(1.0);
    let frames = context.settings.playback.demo_frames;
    inspector.set_playing(&mut context.network, true)?;
    for _ in 0..frames {
        std::thread::sleep(Duration::from_secs_f32(1.0 / rate));
        context.network.pump_external();
    }
    inspector.set_playing(&mut context.network, false)?;

    if let Some(field) = inspector.field_named("time") {
        let frame = inspector::field_value(&mut context.network, field)?;
        tracing::info!(node = %inspector.title(), ?frame, "Stopped playback");
    }
    Ok(())
}
