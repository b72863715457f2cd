//! this binary starts the tuple server
//! to see the list of options, type: `tuple-server --help`

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use clap::{arg_enum, crate_version, value_t, App, Arg};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use tuplestore::thread_pool::{NaiveThreadPool, RayonThreadPool, SharedQueueThreadPool, ThreadPool};
use tuplestore::{
    Coordination, LogStore, MemStore, Result, ServerConfig, TupleEngine, TupleError, TupleServer,
};

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Engine {
        mem,
        log
    }
}

arg_enum! {
    #[allow(non_camel_case_types)]
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    enum Pool {
        naive,
        shared,
        rayon
    }
}

/// ['Opt'] holds parsed and validated options from the command line
#[derive(Debug)]
struct Opt {
    config: ServerConfig,
    engine: Engine,
    dir: PathBuf,
    pool: Pool,
    threads: u32,
}

fn main() {
    // set up a tracing subscriber to log to STDERR
    subscriber_config();

    let matches = App::new("tuple-server")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("a multi-threaded tuple store server")
        .arg(Arg::with_name("port")
            .long("port")
            .value_name("PORT")
            .help("sets the port the server listens on")
            .default_value("4000"))
        .arg(Arg::with_name("host")
            .long("host")
            .value_name("IP_ADDR")
            .help("sets the IP address the server listens on")
            .default_value("0.0.0.0"))
        .arg(Arg::with_name("engine")
            .long("engine")
            .value_name("ENGINE_NAME")
            .help("sets the storage engine to use")
            .possible_values(&Engine::variants())
            .default_value("mem"))
        .arg(Arg::with_name("dir")
            .long("dir")
            .value_name("DIR")
            .help("directory holding the log engine's files")
            .default_value("."))
        .arg(Arg::with_name("coordination")
            .long("coordination")
            .value_name("MODE")
            .help("how storage operations of concurrent connections are coordinated")
            .possible_values(&["single-flight", "per-key"])
            .default_value("single-flight"))
        .arg(Arg::with_name("pool")
            .long("pool")
            .value_name("POOL")
            .help("the thread pool running the per-connection workers")
            .possible_values(&Pool::variants())
            .default_value("naive"))
        .arg(Arg::with_name("threads")
            .long("threads")
            .value_name("N")
            .help("number of threads of the shared and rayon pools")
            .default_value("4"))
        .arg(Arg::with_name("read-timeout-ms")
            .long("read-timeout-ms")
            .value_name("MS")
            .help("how long a worker waits for a request line, 0 waits forever")
            .default_value("30000"))
        .get_matches();

    let opt = match parse_options(&matches) {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    if let Err(e) = run(opt) {
        eprintln!("{}", e);
        exit(1);
    }
}

fn parse_options(matches: &clap::ArgMatches) -> Result<Opt> {
    let bad = |e: clap::Error| TupleError::Config(e.message);
    let host = value_t!(matches, "host", IpAddr).map_err(bad)?;
    let port = value_t!(matches, "port", u16).map_err(bad)?;
    let coordination = value_t!(matches, "coordination", Coordination).map_err(bad)?;
    let read_timeout = match value_t!(matches, "read-timeout-ms", u64).map_err(bad)? {
        0 => None,
        ms => Some(Duration::from_millis(ms)),
    };

    Ok(Opt {
        config: ServerConfig::new(SocketAddr::new(host, port))
            .coordination(coordination)
            .read_timeout(read_timeout),
        engine: value_t!(matches, "engine", Engine).map_err(bad)?,
        dir: matches.value_of("dir").map(PathBuf::from).unwrap_or_default(),
        pool: value_t!(matches, "pool", Pool).map_err(bad)?,
        threads: value_t!(matches, "threads", u32).map_err(bad)?,
    })
}

fn run(opt: Opt) -> Result<()> {
    info!("tuple-server {}", env!("CARGO_PKG_VERSION"));
    info!("Storage engine: {}", opt.engine);

    match opt.engine {
        Engine::mem => run_with_engine(MemStore::new(), &opt),
        Engine::log => run_with_engine(LogStore::open(&opt.dir)?, &opt),
    }
}

fn run_with_engine<E: TupleEngine>(engine: E, opt: &Opt) -> Result<()> {
    info!("Worker pool: {}", opt.pool);
    match opt.pool {
        Pool::naive => serve(engine, NaiveThreadPool::new(opt.threads)?, opt),
        Pool::shared => serve(engine, SharedQueueThreadPool::new(opt.threads)?, opt),
        Pool::rayon => serve(engine, RayonThreadPool::new(opt.threads)?, opt),
    }
}

fn serve<E: TupleEngine, P: ThreadPool>(engine: E, pool: P, opt: &Opt) -> Result<()> {
    let server = TupleServer::bind(opt.config.clone(), engine, pool)?;
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("Exiting the server...");
        shutdown.trigger();
    })
    .map_err(|e| TupleError::StringErr(format!("could not install the Ctrl-C handler: {}", e)))?;

    server.run()
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
