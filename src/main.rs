fn main() -> std::process::ExitCode {
    media_transform::run()
}
