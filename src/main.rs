use autostore_sim::config::SimConfig;
use autostore_sim::{logging, sim};

fn print_usage(program: &str) {
    println!("AutoStore warehouse simulator");
    println!("Usage:");
    println!("  {program} [--config <path>] (run demo)");
    println!("  {program} [--config <path>] bench [robots] [orders] [time_scale]");
    println!("  {program} --help");
    println!();
    println!("The config file is JSON; missing fields keep their defaults.");
    println!("Defaults:");
    println!("  demo   robots=3 orders=6 time_scale=0.01 grid=8x8x5");
    println!("  bench  robots=4 orders=40 time_scale=0.001");
    println!("Set RUST_LOG (e.g. RUST_LOG=debug) to control log output on stderr.");
}

fn exit_with_usage(program: &str, message: &str) -> ! {
    eprintln!("{message}");
    print_usage(program);
    std::process::exit(2);
}

/// Pull `--config <path>` out of the argument list, loading it if present.
fn take_config(program: &str, args: &mut Vec<String>) -> Option<SimConfig> {
    let index = args.iter().position(|arg| arg == "--config")?;
    if index + 1 >= args.len() {
        exit_with_usage(program, "--config requires a path");
    }
    let path = args.remove(index + 1);
    args.remove(index);
    match SimConfig::from_json_file(&path) {
        Ok(config) => Some(config),
        Err(err) => exit_with_usage(program, &format!("{err}")),
    }
}

fn parse_opt<T: std::str::FromStr>(program: &str, name: &str, value: Option<&String>) -> Option<T> {
    let value = value?;
    match value.parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => exit_with_usage(program, &format!("bench: invalid {name} value: {value}")),
    }
}

fn main() {
    logging::init();

    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "autostore_sim".to_string());
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let file_config = take_config(&program, &mut args);

    let outcome = match args.first().map(String::as_str) {
        None | Some("demo") => sim::run_demo(file_config.unwrap_or_else(sim::demo_config)),
        Some("bench") => {
            if args.len() > 4 {
                exit_with_usage(&program, &format!("bench: unexpected argument: {}", args[4]));
            }
            let robots = parse_opt::<usize>(&program, "robots", args.get(1));
            let orders = parse_opt::<usize>(&program, "orders", args.get(2));
            let time_scale = parse_opt::<f64>(&program, "time_scale", args.get(3));
            sim::run_benchmark(robots, orders, time_scale, file_config.unwrap_or_default())
        }
        Some("--help") | Some("-h") | Some("help") => {
            print_usage(&program);
            Ok(())
        }
        Some(other) => exit_with_usage(&program, &format!("unknown command: {other}")),
    };

    if let Err(err) = outcome {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
