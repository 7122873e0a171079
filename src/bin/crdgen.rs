use maintenance_supervisor::crd::KindRegistry;

fn main() -> anyhow::Result<()> {
    let registry = KindRegistry::with_defaults()?;
    for crd in registry.crds() {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
