pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod model;
pub mod reconcile;
pub mod render;
pub mod renewal;
pub mod reorder;
pub mod state;
pub mod store;

use std::ffi::OsString;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::app::{
  App,
  StartOptions
};
use crate::cli::Command;
use crate::datastore::DataStore;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting docket CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.docketrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let store = if cli.memory {
    DataStore::in_memory()
  } else {
    let data_dir =
      config::resolve_data_dir(
        &cfg,
        cli.data.as_deref()
      )
      .context(
        "failed to resolve data \
         directory"
      )?;
    DataStore::open(&data_dir)
      .with_context(|| {
        format!(
          "failed to open datastore \
           at {}",
          data_dir.display()
        )
      })?
  };

  let now = Utc::now();
  let tz = datetime::resolve_timezone(
    cfg.timezone().as_deref()
  );
  let options = StartOptions {
    seed_defaults: cfg.seed_defaults()
  };
  let mut app =
    App::start(store, now, tz, options)?;

  let renderer =
    render::Renderer::new(&cfg)?;
  let command = cli
    .command
    .unwrap_or(Command::Categories);

  let result = commands::dispatch(
    &mut app, &renderer, command, now
  );
  app.stop();

  result?;
  info!("done");
  Ok(())
}
