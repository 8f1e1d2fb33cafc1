fn main() {
    eightball::term::main()
}
