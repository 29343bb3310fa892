fn main() {
    if let Err(err) = twinray::run() {
        log::error!("{err}");
        std::process::exit(1);
    }
}
