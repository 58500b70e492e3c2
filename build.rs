fn main() {
    // MediaRemote lives in PrivateFrameworks, which is not on the default framework search path.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos") {
        println!("cargo:rustc-link-search=framework=/System/Library/PrivateFrameworks");
    }
}
