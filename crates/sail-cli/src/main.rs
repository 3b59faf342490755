fn main() -> Result<(), Box<dyn std::error::Error>> {
    sail_cli::runner::main(std::env::args().collect())
}
