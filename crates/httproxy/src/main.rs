fn main() {
    if let Err(err) = smol::block_on(httproxy::run()) {
        eprintln!("httproxy: {err}");
        std::process::exit(1);
    }
}
