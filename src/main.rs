use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    spoilerfree::cli::main()
}
