fn main() {
    sqdelta::cli::run();
}
