use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};

use crate::error::{Result, UsageError};
use crate::fs::{DirectoryProbe, OsDirectoryProbe};
use crate::plugins::PluginPathRegistry;
use crate::validate::{
    validate_auto_reload, validate_batch_delay, validate_batch_size, validate_reload_interval,
    validate_worker_count,
};
use crate::{LogLevel, LogSettings, PipelineSource, RunConfiguration, DEFAULT_PIPELINE_ID};

const BIN_NAME: &str = "sluice";

// Numeric options are taken as raw strings so that their validation runs after
// the source checks, in a fixed order.
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about = "Run a log processing pipeline")]
struct Args {
    /// Pipeline definition given on the command line
    #[arg(short = 'e', long = "config-string", value_name = "CONFIG_STRING")]
    config_string: Option<String>,

    /// Load the pipeline definition from a file
    #[arg(short = 'f', long = "config", value_name = "CONFIG_PATH")]
    config_path: Option<PathBuf>,

    /// Identifier of the pipeline
    #[arg(long = "pipeline-id", value_name = "ID", default_value = DEFAULT_PIPELINE_ID)]
    pipeline_id: String,

    /// Number of pipeline workers (default: number of CPUs)
    #[arg(
        short = 'w',
        long = "pipeline-workers",
        value_name = "COUNT",
        allow_hyphen_values = true
    )]
    workers: Option<String>,

    /// Events a worker collects before flushing
    #[arg(
        short = 'b',
        long = "pipeline-batch-size",
        value_name = "SIZE",
        allow_hyphen_values = true
    )]
    batch_size: Option<String>,

    /// Longest a worker waits before flushing a partial batch
    #[arg(
        short = 'u',
        long = "pipeline-batch-delay",
        value_name = "DELAY_IN_MS",
        allow_hyphen_values = true
    )]
    batch_delay: Option<String>,

    /// Reload the pipeline when its file changes (requires -f)
    #[arg(short = 'r', long = "auto-reload")]
    auto_reload: bool,

    /// How often to check the pipeline file for changes
    #[arg(
        long = "reload-interval",
        value_name = "SECONDS",
        allow_hyphen_values = true
    )]
    reload_interval: Option<String>,

    /// Directory to search for plugins; may be repeated
    #[arg(short = 'p', long = "pluginpath", value_name = "PATH")]
    plugin_paths: Vec<PathBuf>,

    /// Check the pipeline definition and exit
    #[arg(short = 't', long = "configtest")]
    config_test: bool,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long = "log", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Log at info level
    #[arg(long, conflicts_with_all = ["debug", "quiet"])]
    verbose: bool,

    /// Log at debug level
    #[arg(long, conflicts_with = "quiet")]
    debug: bool,

    /// Only log errors
    #[arg(long)]
    quiet: bool,

    /// Serve prometheus metrics on this address
    #[arg(long = "metrics-bind", value_name = "ADDR")]
    metrics_bind: Option<SocketAddr>,
}

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Run(RunConfiguration),
    /// `--help` was given; the rendered help text.
    Help(String),
    /// `--version` was given; the rendered version line.
    Version(String),
}

/// Turns a raw argument list into a [`RunConfiguration`].
pub struct ConfigResolver<P = OsDirectoryProbe> {
    probe: P,
}

impl ConfigResolver<OsDirectoryProbe> {
    pub fn new() -> Self {
        Self {
            probe: OsDirectoryProbe,
        }
    }
}

impl Default for ConfigResolver<OsDirectoryProbe> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DirectoryProbe> ConfigResolver<P> {
    pub fn with_probe(probe: P) -> Self {
        Self { probe }
    }

    /// Resolves `args` (without the program name).
    ///
    /// Plugin paths are registered into `registry` only when every other check
    /// has passed and all of the paths are valid.
    pub fn resolve<I, T>(&self, args: I, registry: &mut PluginPathRegistry) -> Result<Invocation>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        if args.is_empty() {
            return Err(UsageError::NoArguments);
        }

        let parsed = match Args::try_parse_from(std::iter::once(OsString::from(BIN_NAME)).chain(args))
        {
            Ok(parsed) => parsed,
            Err(err) => {
                return match err.kind() {
                    ErrorKind::DisplayHelp
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                        Ok(Invocation::Help(err.to_string()))
                    }
                    ErrorKind::DisplayVersion => Ok(Invocation::Version(err.to_string())),
                    _ => Err(UsageError::Unrecognized(clap_message(&err))),
                }
            }
        };

        self.build(parsed, registry).map(Invocation::Run)
    }

    fn build(&self, args: Args, registry: &mut PluginPathRegistry) -> Result<RunConfiguration> {
        let pipeline_source = match (args.config_string, args.config_path) {
            (Some(_), Some(_)) => {
                return Err(UsageError::IncompatibleOptions(
                    "-e and -f cannot be used together; give exactly one pipeline source"
                        .to_owned(),
                ))
            }
            (Some(inline), None) => PipelineSource::Inline(inline),
            (None, Some(path)) => PipelineSource::File(path),
            (None, None) => return Err(UsageError::MissingPipelineSource),
        };

        validate_auto_reload(args.auto_reload, pipeline_source.is_file_backed())?;

        let workers = args
            .workers
            .as_deref()
            .map(validate_worker_count)
            .transpose()?;
        let batch_size = args
            .batch_size
            .as_deref()
            .map(validate_batch_size)
            .transpose()?;
        let batch_delay = args
            .batch_delay
            .as_deref()
            .map(validate_batch_delay)
            .transpose()?;
        let reload_interval = args
            .reload_interval
            .as_deref()
            .map(validate_reload_interval)
            .transpose()?;

        if args.pipeline_id.trim().is_empty() {
            return Err(UsageError::InvalidArgument {
                flag: "--pipeline-id",
                reason: "must not be empty".to_owned(),
            });
        }

        registry.register_all(&self.probe, &args.plugin_paths)?;

        let level = if args.debug {
            LogLevel::Debug
        } else if args.verbose {
            LogLevel::Info
        } else if args.quiet {
            LogLevel::Error
        } else {
            LogLevel::default()
        };

        Ok(RunConfiguration {
            pipeline_source,
            pipeline_id: args.pipeline_id,
            workers,
            batch_size,
            batch_delay,
            auto_reload: args.auto_reload,
            reload_interval,
            plugin_paths: registry.paths().to_vec(),
            config_test: args.config_test,
            log: LogSettings {
                file: args.log_file,
                level,
            },
            metrics_bind: args.metrics_bind,
        })
    }
}

/// Usage line plus a pointer to `--help`.
pub fn short_help() -> String {
    let usage = Args::command().render_usage();
    format!("{usage}\n\nFor more information, try '--help'.")
}

fn clap_message(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_owned()
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;

    const PIPELINE: &str = "input {} output {}";

    struct KnownDirs(Vec<PathBuf>);

    impl DirectoryProbe for KnownDirs {
        fn is_dir(&self, path: &Path) -> bool {
            self.0.iter().any(|p| p == path)
        }
    }

    fn resolver() -> ConfigResolver<KnownDirs> {
        ConfigResolver::with_probe(KnownDirs(vec!["/plugins/a".into(), "/plugins/b".into()]))
    }

    fn resolve(args: &[&str]) -> (Result<Invocation>, PluginPathRegistry) {
        let mut registry = PluginPathRegistry::new();
        let res = resolver().resolve(args.iter().copied(), &mut registry);
        (res, registry)
    }

    fn run_config(args: &[&str]) -> RunConfiguration {
        match resolve(args).0 {
            Ok(Invocation::Run(cfg)) => cfg,
            other => panic!("expected a run configuration, got {other:?}"),
        }
    }

    #[test]
    fn empty_arguments_are_a_usage_error() {
        let (res, registry) = resolve(&[]);
        assert_eq!(res, Err(UsageError::NoArguments));
        assert!(registry.is_empty());
    }

    #[test]
    fn inline_expression_defaults() {
        let cfg = run_config(&["-e", PIPELINE]);
        assert_eq!(cfg.pipeline_source, PipelineSource::Inline(PIPELINE.into()));
        assert_eq!(cfg.pipeline_id, DEFAULT_PIPELINE_ID);
        assert_eq!(cfg.workers, None);
        assert_eq!(cfg.batch_size, None);
        assert_eq!(cfg.batch_delay, None);
        assert_eq!(cfg.reload_interval, None);
        assert!(!cfg.auto_reload);
        assert!(!cfg.config_test);
        assert!(cfg.plugin_paths.is_empty());
        assert_eq!(cfg.log, LogSettings::default());
    }

    #[test]
    fn auto_reload_with_inline_source_is_rejected() {
        for args in [
            vec!["-r", "-e", PIPELINE],
            vec!["-e", PIPELINE, "--auto-reload"],
            vec!["-r", "-w", "2", "-e", PIPELINE, "-p", "/plugins/a"],
        ] {
            let (res, registry) = resolve(&args);
            assert!(
                matches!(res, Err(UsageError::IncompatibleOptions(_))),
                "{args:?} gave {res:?}"
            );
            assert!(registry.is_empty());
        }
    }

    #[test]
    fn auto_reload_with_file_source() {
        let cfg = run_config(&["-r", "-f", "/etc/sluice/main.conf", "--reload-interval", "10"]);
        assert!(cfg.auto_reload);
        assert_eq!(
            cfg.pipeline_source,
            PipelineSource::File("/etc/sluice/main.conf".into())
        );
        assert_eq!(cfg.reload_interval, Some(Duration::from_secs(10)));
    }

    #[test]
    fn worker_count_flows_into_settings() {
        for n in [1usize, 2, 7, 32] {
            let cfg = run_config(&["-w", &n.to_string(), "-e", PIPELINE]);
            assert_eq!(cfg.workers, Some(n));
            assert_eq!(cfg.pipeline_settings().pipeline_workers, Some(n));
        }
    }

    #[test]
    fn missing_worker_count_is_absent_from_settings() {
        let cfg = run_config(&["-e", PIPELINE]);
        let json = serde_json::to_value(cfg.pipeline_settings()).unwrap();
        assert!(!json.as_object().unwrap().contains_key("pipeline_workers"));
        assert_eq!(json["pipeline_id"], "main");
    }

    #[test]
    fn bad_worker_counts() {
        for raw in ["0", "-3", "many"] {
            let (res, _) = resolve(&["-w", raw, "-e", PIPELINE]);
            assert!(
                matches!(
                    res,
                    Err(UsageError::InvalidArgument {
                        flag: "--pipeline-workers",
                        ..
                    })
                ),
                "{raw} gave {res:?}"
            );
        }
    }

    #[test]
    fn batch_options() {
        let cfg = run_config(&["-e", PIPELINE, "-b", "500", "-u", "25"]);
        assert_eq!(cfg.batch_size, Some(500));
        assert_eq!(cfg.batch_delay, Some(Duration::from_millis(25)));

        let (res, _) = resolve(&["-e", PIPELINE, "-u", "0"]);
        assert!(matches!(
            res,
            Err(UsageError::InvalidArgument {
                flag: "--pipeline-batch-delay",
                ..
            })
        ));
    }

    #[test]
    fn oversized_values_are_usage_errors() {
        for (args, flag) in [
            (vec!["-e", PIPELINE, "-b", "10000000000"], "--pipeline-batch-size"),
            (vec!["-e", PIPELINE, "-w", "100000"], "--pipeline-workers"),
            (vec!["-e", PIPELINE, "-u", "99999999999999999999"], "--pipeline-batch-delay"),
            (
                vec!["-r", "-f", "main.conf", "--reload-interval", "18446744073709551615"],
                "--reload-interval",
            ),
        ] {
            let (res, _) = resolve(&args);
            match res {
                Err(UsageError::InvalidArgument { flag: got, reason }) => {
                    assert_eq!(got, flag);
                    assert!(reason.contains("too large"), "{reason}");
                }
                other => panic!("{args:?} gave {other:?}"),
            }
        }
    }

    #[test]
    fn exactly_one_source() {
        let (res, _) = resolve(&["-e", PIPELINE, "-f", "main.conf"]);
        assert!(matches!(res, Err(UsageError::IncompatibleOptions(_))));

        let (res, _) = resolve(&["-w", "2"]);
        assert_eq!(res, Err(UsageError::MissingPipelineSource));
    }

    #[test]
    fn first_violation_wins() {
        // Both the source rule and the worker count are violated.
        let (res, _) = resolve(&["-r", "-w", "0", "-e", PIPELINE]);
        assert!(matches!(res, Err(UsageError::IncompatibleOptions(_))));

        // Worker count is checked before plugin paths.
        let (res, registry) = resolve(&["-w", "0", "-e", PIPELINE, "-p", "/plugins/a"]);
        assert!(matches!(res, Err(UsageError::InvalidArgument { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn unknown_flags_are_usage_errors() {
        let (res, _) = resolve(&["-e", PIPELINE, "--no-such-flag"]);
        match res {
            Err(UsageError::Unrecognized(msg)) => assert!(msg.contains("--no-such-flag"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }

        let (res, _) = resolve(&["stray"]);
        assert!(matches!(res, Err(UsageError::Unrecognized(_))));
    }

    #[test]
    fn plugin_paths_registered_in_order() {
        let (res, registry) = resolve(&["-p", "/plugins/b", "-e", PIPELINE, "-p", "/plugins/a"]);
        let Ok(Invocation::Run(cfg)) = res else {
            panic!("expected run");
        };
        let expected = [PathBuf::from("/plugins/b"), PathBuf::from("/plugins/a")];
        assert_eq!(registry.paths(), expected);
        assert_eq!(cfg.plugin_paths, expected);
    }

    #[test]
    fn invalid_plugin_path_registers_nothing() {
        let (res, registry) = resolve(&["-e", PIPELINE, "-p", "/plugins/a", "-p", "/missing"]);
        assert_eq!(res, Err(UsageError::InvalidPath("/missing".into())));
        assert!(registry.is_empty());
    }

    #[test]
    fn log_options() {
        let cfg = run_config(&["-e", PIPELINE, "--debug", "-l", "/var/log/sluice.log"]);
        assert_eq!(cfg.log.level, LogLevel::Debug);
        assert_eq!(cfg.log.file, Some(PathBuf::from("/var/log/sluice.log")));

        assert_eq!(run_config(&["-e", PIPELINE, "--verbose"]).log.level, LogLevel::Info);
        assert_eq!(run_config(&["-e", PIPELINE, "--quiet"]).log.level, LogLevel::Error);

        let (res, _) = resolve(&["-e", PIPELINE, "--verbose", "--quiet"]);
        assert!(matches!(res, Err(UsageError::Unrecognized(_))));
    }

    #[test]
    fn pipeline_id_and_configtest() {
        let cfg = run_config(&["-t", "-f", "main.conf", "--pipeline-id", "ingest"]);
        assert!(cfg.config_test);
        assert_eq!(cfg.pipeline_id, "ingest");

        let (res, _) = resolve(&["-e", PIPELINE, "--pipeline-id", " "]);
        assert!(matches!(
            res,
            Err(UsageError::InvalidArgument {
                flag: "--pipeline-id",
                ..
            })
        ));
    }

    #[test]
    fn metrics_bind_parses_socket_address() {
        let cfg = run_config(&["-e", PIPELINE, "--metrics-bind", "127.0.0.1:9184"]);
        assert_eq!(cfg.metrics_bind, Some("127.0.0.1:9184".parse().unwrap()));

        let (res, _) = resolve(&["-e", PIPELINE, "--metrics-bind", "nowhere"]);
        assert!(matches!(res, Err(UsageError::Unrecognized(_))));
    }

    #[test]
    fn help_and_version_are_not_errors() {
        let (res, _) = resolve(&["--help"]);
        match res {
            Ok(Invocation::Help(text)) => assert!(text.contains("--pluginpath")),
            other => panic!("unexpected {other:?}"),
        }

        let (res, _) = resolve(&["-V"]);
        match res {
            Ok(Invocation::Version(text)) => assert!(text.starts_with("sluice")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_help_mentions_usage_and_help_flag() {
        let text = short_help();
        assert!(text.starts_with("Usage: sluice"));
        assert!(text.ends_with("For more information, try '--help'."));
    }
}
