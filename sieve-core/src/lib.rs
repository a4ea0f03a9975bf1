pub mod asn_db;
pub mod config;
pub mod console;
pub mod error;
pub mod link_filter;
pub mod logging;
pub mod origin;
pub mod output;
pub mod paths;
pub mod pipeline;
pub mod source;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let opts = console::Options::parse(args)?;
  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);

  let cfg = if opts.dry_run {
    config::load_or_default_readonly(&config_path)?
  } else {
    config::load_or_create_default(&config_path)?
  };

  let log_dir = paths::logs_dir(&base);
  logging::init(
    (!opts.dry_run).then_some(log_dir.as_path()),
    &cfg.logging.level,
    cfg.logging.retention_days,
  )?;

  tracing::debug!(base = %base.display(), command = ?opts.command, "sieve starting");
  console::run_command(&cfg, &base, &opts)
}
