fn main() {
    // The headless core builds without the Tauri toolchain; only the
    // desktop shell needs the generated context.
    if std::env::var_os("CARGO_FEATURE_DESKTOP").is_some() {
        tauri_build::build();
    }
}
