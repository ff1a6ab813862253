fn main() {
    // Forwards the ESP-IDF link args and cfgs exported by esp-idf-sys.
    // Host builds have none to forward.
    if std::env::var_os("CARGO_FEATURE_ESP32").is_some() {
        embuild::espidf::sysenv::output();
    }
}
