fn main() {
    if let Err(err) = batchscribe::run() {
        eprintln!("fatal: {err:#}");
        std::process::exit(1);
    }
}
