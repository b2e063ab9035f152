fn main() {
    canterm_lib::run()
}
