use sqlx::sqlite::SqlitePoolOptions;
use sqlx::Row;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <search_query>", args[0]);
        eprintln!("Search query matches against sender or subject.");
        std::process::exit(1);
    }

    let query = &args[1];
    let search_term = format!("%{}%", query);

    let config = mailcache::SyncConfig::load();
    let pool = SqlitePoolOptions::new()
        .connect(&config.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    let row = sqlx::query(
        "SELECT id, user_id, sender, subject, time, unread, message_status
         FROM messages
         WHERE sender LIKE ? OR subject LIKE ?
         ORDER BY time DESC
         LIMIT 1",
    )
    .bind(&search_term)
    .bind(&search_term)
    .fetch_optional(&pool)
    .await?;

    let Some(row) = row else {
        println!("No messages found matching '{}'", query);
        return Ok(());
    };

    let id: String = row.get("id");
    let user_id: String = row.get("user_id");
    let sender: Option<String> = row.get("sender");
    let subject: Option<String> = row.get("subject");
    let time: i64 = row.get("time");
    let unread: bool = row.get("unread");
    let status: i64 = row.get("message_status");

    println!("Found Message:");
    println!("ID: {}", id);
    println!("User: {}", user_id);
    println!("Sender: {:?}", sender);
    println!("Subject: {:?}", subject);
    println!("Time: {}", time);
    println!("Unread: {}", unread);
    println!("Status: {}", status);
    println!("--------------------------------------------------------------------------------");

    let labels = sqlx::query("SELECT label_id FROM message_labels WHERE message_id = ?")
        .bind(&id)
        .fetch_all(&pool)
        .await?;
    let label_ids: Vec<String> = labels.into_iter().map(|r| r.get(0)).collect();
    println!("Labels: {:?}", label_ids);

    for label_id in &label_ids {
        let counters = sqlx::query(
            "SELECT view_mode, unread_count, total_count, start_time, end_time, is_new
             FROM label_updates WHERE label_id = ? AND user_id = ?
             ORDER BY view_mode",
        )
        .bind(label_id)
        .bind(&user_id)
        .fetch_all(&pool)
        .await?;
        for counter in counters {
            let view_mode: i64 = counter.get("view_mode");
            let unread_count: i64 = counter.get("unread_count");
            let total_count: i64 = counter.get("total_count");
            let start_time: i64 = counter.get("start_time");
            let end_time: i64 = counter.get("end_time");
            let is_new: bool = counter.get("is_new");
            println!(
                "Label {} view_mode={}: unread={} total={} window=[{}, {}] is_new={}",
                label_id, view_mode, unread_count, total_count, end_time, start_time, is_new
            );
        }
    }

    Ok(())
}
