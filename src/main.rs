fn main() -> Result<(), Box<dyn std::error::Error>> {
    sqlbridge::run()
}
