use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use idp_test::config;
use idp_test::harness::{
    ConfigError, ConfigResult, HarnessConfig, HarnessError, HarnessResult, InteractionResolver,
    OperationRegistry, SequenceRunner,
};
use idp_test::http::{HttpSession, SessionConfig};
use idp_test::protocol::{HttpProfile, RunContext};
use idp_test::report::ReportDir;
use idp_test::runner::Severity;
use idp_test::trace::Trace;

/// idp-test - conformance test driver for SAML identity providers
#[derive(Parser, Debug)]
#[command(
    name = "idp-test",
    version,
    about = "Run named conformance operations against a SAML identity provider",
    after_help = "ENVIRONMENT VARIABLES:\n\
        IDP_TEST_TIMEOUT       Per-request timeout (seconds)\n\
        IDP_TEST_MAX_HOPS      Round-trips allowed within one step\n\
        IDP_TEST_CA_CERTS      PEM bundle for verifying the IdP\n\
        IDP_TEST_OPERATIONS    Operation registry file\n\
        IDP_TEST_REPORT_DIR    Base directory for run reports\n\
        RUST_LOG               Log filter (overrides -v/-d)"
)]
struct Args {
    /// Print debug logs and always dump the trace
    #[arg(short, long)]
    debug: bool,

    /// Print progress logs
    #[arg(short, long)]
    verbose: bool,

    /// CA certificates bundle used to verify the IdP
    #[arg(short = 'C', long = "ca-certs")]
    ca_certs: Option<PathBuf>,

    /// Run configuration as JSON ("-" reads stdin)
    #[arg(short = 'J', long = "json-config")]
    json_config: Option<String>,

    /// SP variant to run as
    #[arg(short = 'S', long = "sp-id")]
    sp_id: Option<String>,

    /// List the configured SP variants
    #[arg(short = 's', long = "list-sp")]
    list_sp: bool,

    /// List the available operations
    #[arg(short = 'l', long)]
    list: bool,

    /// Operation registry file
    #[arg(long, env = "IDP_TEST_OPERATIONS", default_value = config::DEFAULT_OPERATIONS_FILE)]
    operations: PathBuf,

    /// Write verdict and trace into this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write verdict and trace into a fresh report directory and keep it
    #[arg(long, short = 'k')]
    keep: bool,

    /// Operation to run
    oper: Option<String>,
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();
    init_logging(&args);

    if args.list {
        let registry = match OperationRegistry::load(&args.operations) {
            Ok(registry) => registry,
            Err(err) => return Ok(abort(err.into())),
        };
        println!("{}", serde_json::to_string_pretty(&registry.listing())?);
        return Ok(ExitCode::SUCCESS);
    }

    if args.list_sp {
        let config = match load_config(&args) {
            Ok(config) => config,
            Err(err) => return Ok(abort(err.into())),
        };
        println!("{}", serde_json::to_string_pretty(&config.sp_descriptions())?);
        return Ok(ExitCode::SUCCESS);
    }

    let oper = match args.oper.as_deref().map(strip_quotes) {
        Some(oper) if !oper.is_empty() => oper.to_string(),
        _ => return Err("Missing test case specification".into()),
    };

    let Prepared {
        registry,
        resolver,
        context,
        mut session,
    } = match prepare(&args, &oper) {
        Ok(prepared) => prepared,
        Err(err) => return Ok(abort(err)),
    };
    let runner = SequenceRunner::new(&registry, &resolver, &HttpProfile, context);

    let report = if let Some(ref dir) = args.output {
        let report = ReportDir::in_dir(dir).operation(&oper);
        report.init()?;
        Some(report)
    } else if args.keep {
        let report = ReportDir::with_name(&oper).keep(true);
        report.init()?;
        Some(report)
    } else {
        None
    };

    let mut trace = Trace::new();
    match runner.verdict(&oper, &mut session, &mut trace) {
        Ok(verdict) => {
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if verdict.status > Severity::Ok || args.debug {
                eprintln!("{}", trace);
            }
            if let Some(report) = &report {
                report.write_verdict(&verdict)?;
                report.write_trace(&trace)?;
                eprintln!("Report: {}", report.dir.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("{}", trace);
            if let Some(report) = &report {
                report.write_trace(&trace)?;
            }
            Ok(abort(err))
        }
    }
}

/// Everything a run needs, built before the first request
struct Prepared {
    registry: OperationRegistry,
    resolver: InteractionResolver,
    context: RunContext,
    session: HttpSession,
}

fn prepare(args: &Args, oper: &str) -> HarnessResult<Prepared> {
    let registry = OperationRegistry::load(&args.operations)?;
    registry.require(oper)?;

    let config = load_config(args)?;
    let resolver = InteractionResolver::new(&config.interaction)?;
    let context = RunContext::from_config(&config, args.sp_id.as_deref())?;

    let mut session_config = SessionConfig::default();
    if args.ca_certs.is_some() {
        session_config = session_config.ca_certs(args.ca_certs.clone());
    }
    let session = HttpSession::new(&session_config)?;

    Ok(Prepared {
        registry,
        resolver,
        context,
        session,
    })
}

fn abort(err: HarnessError) -> ExitCode {
    eprintln!("[{}] {}", err.fault_class(), err);
    ExitCode::FAILURE
}

fn init_logging(args: &Args) {
    let level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> ConfigResult<HarnessConfig> {
    let path = args
        .json_config
        .as_deref()
        .ok_or_else(|| ConfigError::Invalid("No run configuration given, use -J".to_string()))?;
    HarnessConfig::load(path)
}

/// Drop one pair of surrounding quotes
fn strip_quotes(oper: &str) -> &str {
    let oper = oper.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = oper
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    oper
}
