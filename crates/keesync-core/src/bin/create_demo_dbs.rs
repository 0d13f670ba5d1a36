use keepass::{config::DatabaseConfig, db::Node, db::Value, Database};
use keesync_core::{Credential, KeepassDatabase, DEFAULT_JOBS_GROUP};
use std::path::PathBuf;

fn field(entry: &mut keepass::db::Entry, name: &str, value: &str) {
    let value = if name == "Password" {
        Value::Protected(value.as_bytes().into())
    } else {
        Value::Unprotected(value.to_string())
    };
    entry.fields.insert(name.to_string(), value);
}

fn job(fields: &[(&str, &str)]) -> keepass::db::Entry {
    let mut entry = keepass::db::Entry::new();
    for (name, value) in fields {
        field(&mut entry, name, value);
    }
    entry
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = PathBuf::from(std::env::args().nth(1).unwrap_or_else(|| ".".to_string()));
    std::fs::create_dir_all(&dir)?;

    // Master: a shared site, a private one, and a job pushing "sync" to the slave
    let mut master = Database::new(DatabaseConfig::default());
    master.meta.database_name = Some("Master".to_string());

    let mut web = keepass::db::Group::new("Web");
    let mut shared = keepass::db::Entry::new();
    field(&mut shared, "Title", "Shared site");
    field(&mut shared, "UserName", "team");
    field(&mut shared, "Password", "shared-secret");
    field(&mut shared, "URL", "https://example.com");
    shared.tags.push("sync".to_string());
    web.children.push(Node::Entry(shared));

    let mut private = keepass::db::Entry::new();
    field(&mut private, "Title", "Private site");
    field(&mut private, "Password", "private-secret");
    web.children.push(Node::Entry(private));
    master.root.children.push(Node::Group(web));

    let mut jobs = keepass::db::Group::new(DEFAULT_JOBS_GROUP);
    jobs.children.push(Node::Entry(job(&[
        ("Title", "Push to slave"),
        ("TargetFilePath", "slave.kdbx"),
        ("Password", "slave"),
        ("Tag", "sync"),
    ])));
    master.root.children.push(Node::Group(jobs));

    // Slave: pushes its own "sync" entries back using the master's credential
    let mut slave = Database::new(DatabaseConfig::default());
    slave.meta.database_name = Some("Slave".to_string());
    let mut jobs = keepass::db::Group::new(DEFAULT_JOBS_GROUP);
    jobs.children.push(Node::Entry(job(&[
        ("Title", "Back to master"),
        ("TargetFilePath", "master.kdbx"),
        ("Tag", "sync"),
        ("IsSlave", "true"),
    ])));
    slave.root.children.push(Node::Group(jobs));

    KeepassDatabase::new(master, dir.join("master.kdbx"), Credential::with_password("master")).save()?;
    KeepassDatabase::new(slave, dir.join("slave.kdbx"), Credential::with_password("slave")).save()?;

    println!(
        "Created master.kdbx (password 'master') and slave.kdbx (password 'slave') in {}",
        dir.display()
    );
    Ok(())
}
