use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    quill::cli::main()
}
