use dexlink::classpath::{ClassPathConfig, Opcodes};
use dexlink::{check_linkage, find_dex_containers};
use std::env;
use std::error::Error;
use std::path::PathBuf;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("usage: linkcheck <apk|dex|oat> [device-root] [api-level]");
        return;
    }

    // Do everything else with the error trap
    match run(&args[1], args.get(2), args.get(3)) {
        Ok(true) => println!("All references resolve."),
        Ok(false) => process::exit(1),
        Err(e) => {
            println!("Aborted due to error: {}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                println!("  caused by: {}", cause);
                source = cause.source();
            }
            process::exit(2);
        }
    }
}

/* This is where all the processing takes place, to make error handling easier */
fn run(
    input: &str,
    device_root: Option<&String>,
    api: Option<&String>,
) -> Result<bool, Box<dyn Error>> {
    let mut config = ClassPathConfig {
        input: Some(PathBuf::from(input)),
        ..Default::default()
    };
    if let Some(api) = api {
        config.opcodes = Opcodes::for_api(api.parse()?);
    }
    if let Some(root) = device_root {
        let root = PathBuf::from(root);
        println!("{} containers under {}", find_dex_containers(&root)?.len(), root.display());
        config.boot_class_path_dirs.push(root);
    }

    let report = check_linkage(&config)?;
    print!("{}", report);
    Ok(report.is_clean())
}
