//! The tuple-client executable sends a single request to a tuple server. The server is
//! located through the `IP_TUPLAS` and `PORT_TUPLAS` environment variables.
//!
//! `tuple-client init`
//!
//!     Destroy every tuple stored on the server.
//!
//! `tuple-client set <KEY> <VALUE1> <VALUE2>...`
//!
//!     Store a new tuple. VALUE2 is a list of 1 to 32 numbers.
//!
//! `tuple-client get <KEY>`
//!
//!     Print the tuple stored under KEY, or "Key not found".
//!
//! `tuple-client modify <KEY> <VALUE1> <VALUE2>...`
//!
//!     Replace the tuple stored under KEY.
//!
//! `tuple-client delete <KEY>` and `tuple-client exist <KEY>`
//!
//! Status returning commands print the server's result code. The exit code is 2 if the
//! server could not be reached, 1 on any other error.

use std::process::exit;

use clap::{crate_version, value_t, App, AppSettings, Arg, ArgMatches, SubCommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tuplestore::{Result, TupleClient, TupleError};

fn main() {
    // configure a subscriber that will log messages to STDERR
    subscriber_config();

    let key = || {
        Arg::with_name("KEY")
            .required(true)
            .allow_hyphen_values(true)
            .index(1)
    };
    let tuple_arg_list = || {
        vec![
            key(),
            Arg::with_name("VALUE1").required(true).index(2),
            Arg::with_name("VALUE2")
                .required(true)
                .multiple(true)
                .allow_hyphen_values(true)
                .index(3),
        ]
    };

    let matches = App::new("tuple-client")
        .version(crate_version!())
        .author("strohs <strohs1@gmail.com>")
        .about("sends one request to a tuple server")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .global_setting(AppSettings::AllowNegativeNumbers)
        .subcommands(vec![
            SubCommand::with_name("init").about("Destroy every stored tuple"),
            SubCommand::with_name("set")
                .about("Store a tuple under a new key")
                .args(&tuple_arg_list()),
            SubCommand::with_name("get")
                .about("Get the tuple stored under a key")
                .arg(key()),
            SubCommand::with_name("modify")
                .about("Replace the tuple stored under a key")
                .args(&tuple_arg_list()),
            SubCommand::with_name("delete")
                .about("Delete a key")
                .arg(key()),
            SubCommand::with_name("exist")
                .about("Print 1 if a key exists, 0 if not")
                .arg(key()),
        ])
        .get_matches();

    if let Err(e) = run(&matches) {
        eprintln!("{}", e);
        exit(if e.is_communication() { 2 } else { 1 });
    }
}

/// runs the requested command against the server
fn run(matches: &ArgMatches) -> Result<()> {
    let client = TupleClient::from_env()?;
    match matches.subcommand() {
        ("init", Some(_)) => println!("{}", client.init()?),
        ("set", Some(args)) => {
            let (key, value1, value2) = tuple_args(args)?;
            println!("{}", client.set_value(key, &value1, &value2)?);
        }
        ("get", Some(args)) => match client.get_value(key_arg(args)?)? {
            Some(tuple) => {
                let values: Vec<String> = tuple.value2.iter().map(f64::to_string).collect();
                println!("{} {}", tuple.value1, values.join(" "));
            }
            None => println!("Key not found"),
        },
        ("modify", Some(args)) => {
            let (key, value1, value2) = tuple_args(args)?;
            println!("{}", client.modify_value(key, &value1, &value2)?);
        }
        ("delete", Some(args)) => println!("{}", client.delete_key(key_arg(args)?)?),
        ("exist", Some(args)) => println!("{}", client.exist(key_arg(args)?)?),
        (other, _) => {
            return Err(TupleError::InvalidArgument(format!("unknown command '{}'", other)))
        }
    }
    Ok(())
}

fn key_arg(args: &ArgMatches) -> Result<i32> {
    value_t!(args, "KEY", i32).map_err(|e| TupleError::InvalidArgument(e.message))
}

fn tuple_args(args: &ArgMatches) -> Result<(i32, String, Vec<f64>)> {
    let key = key_arg(args)?;
    let value1 = args.value_of("VALUE1").unwrap_or_default().to_string();
    let value2 = args
        .values_of("VALUE2")
        .into_iter()
        .flatten()
        .map(|v| {
            v.parse::<f64>()
                .map_err(|_| TupleError::InvalidArgument(format!("'{}' is not a number", v)))
        })
        .collect::<Result<Vec<f64>>>()?;
    Ok((key, value1, value2))
}

/// configures a tracing subscriber that will log to STDERR
fn subscriber_config() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        // log to stderr instead of stdout
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting tracing default subscriber failed");
}
