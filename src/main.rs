fn main() {
    compass_launcher::run()
}
