fn main() {
    if let Err(err) = databridge::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
