fn main() {
    #[cfg(feature = "cli")]
    pngpress::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("pngpress: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
