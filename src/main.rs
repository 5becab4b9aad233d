fn main() {
    if let Err(err) = photo_courier_lib::run() {
        log::error!("photo-courier failed: {err:?}");
        eprintln!("photo-courier failed: {err:?}");
        std::process::exit(1);
    }
}
