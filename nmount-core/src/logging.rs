use std::path::Path;

/// Route logs to `log_file`, falling back to stderr when it cannot be opened.
/// `RUST_LOG` overrides the default level.
pub fn init(log_file: &Path, verbose: bool) {
    use env_logger::{Env, Target};
    use std::fs;
    use std::io;

    let target = (|| -> io::Result<Target> {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        Ok(Target::Pipe(Box::new(file)))
    })()
    .unwrap_or(Target::Stderr);

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    // A second init (tests, embedding) keeps the first logger.
    let _ = env_logger::Builder::new()
        .target(target)
        .filter_level(level)
        .parse_env(Env::default())
        .try_init();
}
