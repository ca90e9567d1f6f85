//! CLI subcommand handlers.

use crate::render;
use crate::{
    ChatAction, Commands, ConfigAction, ConnectorAction, ConversationAction, DocumentAction,
    SettingsAction,
};
use ragstream_core::{
    ChatState, ClientConfig, ConnectorType, Document, DocumentStatus, MessageState, RagClient,
    Role, SettingsUpdate, UploadFile, ViewModel,
};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    config: ClientConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    if let Commands::Config { action } = command {
        return handle_config(action, &config, workspace);
    }

    let client = RagClient::connect(config)?;
    let result = match command {
        Commands::Chat { action } => handle_chat(&client, action).await,
        Commands::Conversations { action } => handle_conversations(&client, action).await,
        Commands::Documents { action } => handle_documents(&client, action).await,
        Commands::Connectors { action } => handle_connectors(&client, action).await,
        Commands::Settings { action } => handle_settings(&client, action).await,
        Commands::Health => {
            let health = client.api().health().await?;
            println!("{}: {}", client.config().server.api_url, health.status);
            Ok(())
        }
        Commands::Config { .. } => Ok(()),
    };
    client.shutdown();
    result
}

fn handle_config(action: ConfigAction, config: &ClientConfig, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", ragstream_core::config::to_toml(config)?);
            Ok(())
        }
        ConfigAction::Init => {
            let config_dir = workspace.join(".ragstream");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = ragstream_core::config::to_toml(&ClientConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
    }
}

async fn handle_chat(client: &RagClient, action: ChatAction) -> anyhow::Result<()> {
    match action {
        ChatAction::New { title } => {
            let conversation = client.create_conversation(&title).await?;
            println!("{}", conversation.id);
            Ok(())
        }
        ChatAction::Send {
            conversation,
            message,
            no_stream: true,
        } => {
            let reply = client.send_message(&message, Some(&conversation)).await?;
            println!("{}", reply.message);
            if !reply.sources.is_empty() {
                println!("\nSources:\n{}", render::sources_block(&reply.sources));
            }
            Ok(())
        }
        ChatAction::Send {
            conversation,
            message,
            no_stream: false,
        } => stream_turn(client, &conversation, &message).await,
    }
}

/// Send one message and print the reply as tokens arrive.
async fn stream_turn(client: &RagClient, conversation_id: &str, text: &str) -> anyhow::Result<()> {
    let mut view = client.projector().subscribe();
    let mut turn = client.chat().send(conversation_id, text).await?;
    let mut stdout = std::io::stdout();
    let mut printed = 0;

    let finished = turn.finished();
    tokio::pin!(finished);
    let state = loop {
        tokio::select! {
            state = &mut finished => break state,
            changed = view.changed() => {
                if changed.is_err() {
                    break ChatState::Failed;
                }
                let model = view.borrow_and_update().clone();
                printed += print_new_content(&mut stdout, &model, conversation_id, printed)?;
            }
        }
    };

    // The projector may still hold the last tokens of the turn.
    let model = client
        .projector()
        .wait_for(|m| m.conversation(conversation_id).is_some_and(|c| !c.turn_in_flight))
        .await
        .unwrap_or_else(|| client.projector().snapshot());
    print_new_content(&mut stdout, &model, conversation_id, printed)?;
    println!();

    let Some(answer) = assistant_reply(&model, conversation_id) else {
        let reason = model
            .conversation(conversation_id)
            .and_then(|c| c.last_error.clone())
            .unwrap_or_else(|| state.to_string());
        anyhow::bail!("No reply received: {}", reason);
    };
    if let Some(sources) = answer.sources.as_deref()
        && !sources.is_empty()
    {
        println!("\nSources:\n{}", render::sources_block(sources));
    }
    match &answer.state {
        MessageState::Failed { reason } => anyhow::bail!("Reply incomplete: {}", reason),
        _ if state != ChatState::Done => anyhow::bail!("Reply incomplete: turn {}", state),
        _ => Ok(()),
    }
}

fn assistant_reply<'a>(
    model: &'a ViewModel,
    conversation_id: &str,
) -> Option<&'a ragstream_core::Message> {
    model
        .conversation(conversation_id)?
        .last_message()
        .filter(|m| m.role == Role::Assistant)
}

/// Write the part of the reply not yet printed. Returns the bytes written.
fn print_new_content(
    out: &mut impl Write,
    model: &ViewModel,
    conversation_id: &str,
    printed: usize,
) -> std::io::Result<usize> {
    let Some(answer) = assistant_reply(model, conversation_id) else {
        return Ok(0);
    };
    let fresh = answer.content.get(printed..).unwrap_or_default();
    if fresh.is_empty() {
        return Ok(0);
    }
    out.write_all(fresh.as_bytes())?;
    out.flush()?;
    Ok(fresh.len())
}

async fn handle_conversations(client: &RagClient, action: ConversationAction) -> anyhow::Result<()> {
    match action {
        ConversationAction::List => {
            let conversations = client.load_conversations().await?;
            print!("{}", render::conversation_table(&conversations));
        }
        ConversationAction::Show { id } => {
            let detail = client.open_conversation(&id).await?;
            println!("{} ({})\n", detail.title, detail.id);
            for message in &detail.messages {
                println!("{}\n", render::message_block(message));
            }
        }
        ConversationAction::Delete { id } => {
            client.delete_conversation(&id).await?;
            println!("Deleted conversation {}", id);
        }
    }
    Ok(())
}

async fn handle_documents(client: &RagClient, action: DocumentAction) -> anyhow::Result<()> {
    let ingestion = client.ingestion();
    match action {
        DocumentAction::List => {
            let docs = ingestion.refresh().await?;
            print!("{}", render::document_table(&docs));
        }
        DocumentAction::Upload { paths, no_watch } => {
            let files = paths
                .iter()
                .map(|path| read_upload(path))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let docs = ingestion.upload(files).await?;
            print!("{}", render::document_table(&docs));
            if !no_watch {
                follow_documents(client, &docs).await?;
            }
        }
        DocumentAction::Url { url, no_watch } => {
            let doc = ingestion.ingest_url(&url).await?;
            print!("{}", render::document_table(std::slice::from_ref(&doc)));
            if !no_watch {
                follow_documents(client, std::slice::from_ref(&doc)).await?;
            }
        }
        DocumentAction::Watch { id } => {
            let docs = ingestion.refresh().await?;
            let Some(doc) = docs.into_iter().find(|d| d.id == id) else {
                anyhow::bail!("Document not found: {}", id);
            };
            if doc.status.is_terminal() {
                println!("{}: {}", doc.filename, render::document_status(&doc));
                return Ok(());
            }
            follow_documents(client, std::slice::from_ref(&doc)).await?;
        }
        DocumentAction::Delete { id } => {
            ingestion.delete(&id).await?;
            println!("Deleted document {}", id);
        }
    }
    Ok(())
}

fn read_upload(path: &Path) -> anyhow::Result<UploadFile> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", path.display(), e))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("Not a file: {}", path.display()))?;
    Ok(UploadFile::new(filename, bytes))
}

/// Print status changes until every document reaches a terminal status or
/// is no longer tracked.
async fn follow_documents(client: &RagClient, docs: &[Document]) -> anyhow::Result<()> {
    let mut view = client.projector().subscribe();
    let mut last_seen: Vec<Option<String>> = vec![None; docs.len()];
    loop {
        let model = view.borrow_and_update().clone();
        let mut pending = 0;
        for (doc, seen) in docs.iter().zip(last_seen.iter_mut()) {
            let Some(current) = model.document(&doc.id) else {
                // Not projected yet, or removed by the backend since.
                if seen.is_none() && !doc.status.is_terminal() {
                    pending += 1;
                }
                continue;
            };
            let line = render::document_status(current);
            if seen.as_deref() != Some(line.as_str()) {
                println!("{}: {}", current.filename, line);
                *seen = Some(line);
            }
            if !current.status.is_terminal() && !model.is_abandoned(&doc.id) {
                pending += 1;
            }
        }
        if pending == 0 {
            break;
        }
        if view.changed().await.is_err() {
            anyhow::bail!("Projector stopped before ingestion finished");
        }
    }

    ingestion_outcome(&client.projector().snapshot(), docs)
}

fn ingestion_outcome(model: &ViewModel, docs: &[Document]) -> anyhow::Result<()> {
    let failed = docs
        .iter()
        .filter(|d| model.document(&d.id).is_some_and(|d| d.status == DocumentStatus::Failed))
        .count();
    if failed > 0 {
        anyhow::bail!("{} document(s) failed to ingest", failed);
    }
    let abandoned: Vec<&str> = docs
        .iter()
        .filter(|d| model.is_abandoned(&d.id))
        .map(|d| d.id.as_str())
        .collect();
    if !abandoned.is_empty() {
        anyhow::bail!(
            "Lost track of ingestion for {}; run `ragstream documents watch <id>` to resume",
            abandoned.join(", ")
        );
    }
    Ok(())
}

async fn handle_connectors(client: &RagClient, action: ConnectorAction) -> anyhow::Result<()> {
    let connectors = client.connectors();
    match action {
        ConnectorAction::List => {
            let list = connectors.refresh().await?;
            print!("{}", render::connector_table(&list));
        }
        ConnectorAction::Create {
            name,
            connector_type,
            config,
        } => {
            let config: serde_json::Value = serde_json::from_str(&config)
                .map_err(|e| anyhow::anyhow!("Invalid --config JSON: {}", e))?;
            let connector_type: ConnectorType = connector_type.parse()?;
            let created = connectors.create(&name, connector_type, config).await?;
            print!("{}", render::connector_table(std::slice::from_ref(&created)));
        }
        ConnectorAction::Test { id } => {
            let result = connectors.test(&id).await?;
            let verdict = if result.ok { "ok" } else { "failed" };
            println!("{}: {} {}", id, verdict, result.message);
        }
        ConnectorAction::Sync { id } => {
            let refresh = connectors.sync(&id).await?;
            println!("Sync started for {}", id);
            // Wait for the follow-up refresh so the listing reflects the job.
            let _ = refresh.await;
            let projected = tokio::time::timeout(
                Duration::from_secs(1),
                client.projector().wait_for(|m| m.connector(&id).is_some()),
            )
            .await;
            if let Ok(Some(model)) = projected
                && let Some(connector) = model.connector(&id)
            {
                print!("{}", render::connector_table(std::slice::from_ref(connector)));
            }
        }
        ConnectorAction::Delete { id } => {
            connectors.delete(&id).await?;
            println!("Deleted connector {}", id);
        }
    }
    Ok(())
}

async fn handle_settings(client: &RagClient, action: SettingsAction) -> anyhow::Result<()> {
    let settings = match action {
        SettingsAction::Show => client.load_settings().await?,
        SettingsAction::Set { pairs } => {
            let update = parse_settings_update(&pairs)?;
            client.update_settings(&update).await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn parse_settings_update(pairs: &[String]) -> anyhow::Result<SettingsUpdate> {
    let mut update = SettingsUpdate::default();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("Expected key=value, got '{}'", pair);
        };
        update
            .set(key.trim(), value.trim())
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    Ok(update)
}
