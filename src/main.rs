fn main() {
    if let Err(err) = focusbridge_lib::run() {
        log::error!("focusbridge host failed: {err:#}");
        std::process::exit(1);
    }
}
