use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    inferx::cli::main()
}
