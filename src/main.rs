fn main() {
    if let Err(err) = csv_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
