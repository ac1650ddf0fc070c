fn main() -> anyhow::Result<()> {
    livecast_host::run()
}
