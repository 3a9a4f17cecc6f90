fn main() {
    kiln::start_cli();
}
