fn main() {
    bv_pipeline::cli::run();
}
