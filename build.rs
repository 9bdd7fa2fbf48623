fn main() {
    // ESP-IDF builds need the sysenv exported by embuild; host builds have
    // nothing to generate.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
