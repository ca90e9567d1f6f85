//! Plain-text rendering of backend records for the terminal.

use ragstream_core::{
    Connector, Conversation, Document, DocumentStatus, Message, MessageState, Source,
};

/// One line describing where a document is in the pipeline.
pub fn document_status(doc: &Document) -> String {
    match (doc.status, doc.progress, doc.error_message.as_deref()) {
        (DocumentStatus::Failed, _, Some(reason)) => format!("failed: {}", reason),
        (status, Some(progress), _) if !status.is_terminal() => {
            format!("{} {:>3}%", status, progress)
        }
        (status, _, _) => status.to_string(),
    }
}

pub fn document_table(docs: &[Document]) -> String {
    if docs.is_empty() {
        return "No documents.".to_string();
    }
    let name_width = docs
        .iter()
        .map(|d| d.filename.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(8, 48);

    let mut out = format!(
        "{:<36}  {:<name_width$}  {:<9}  {:>8}  {:>6}  STATUS\n",
        "ID", "NAME", "SOURCE", "SIZE", "CHUNKS"
    );
    for doc in docs {
        out.push_str(&format!(
            "{:<36}  {:<name_width$}  {:<9}  {:>8}  {:>6}  {}\n",
            doc.id,
            truncate(&doc.filename, name_width),
            format!("{:?}", doc.source_type()).to_lowercase(),
            doc.file_size.map(format_size).unwrap_or_else(|| "-".into()),
            doc.chunk_count.map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            document_status(doc),
        ));
    }
    out
}

pub fn connector_table(connectors: &[Connector]) -> String {
    if connectors.is_empty() {
        return "No connectors.".to_string();
    }
    let mut out = format!(
        "{:<36}  {:<20}  {:<12}  {:<12}  {:>5}  LAST SYNC\n",
        "ID", "NAME", "TYPE", "STATUS", "DOCS"
    );
    for connector in connectors {
        out.push_str(&format!(
            "{:<36}  {:<20}  {:<12}  {:<12}  {:>5}  {}\n",
            connector.id,
            truncate(&connector.name, 20),
            connector.connector_type.to_string(),
            connector.status.to_string(),
            connector.document_count,
            connector.last_synced.as_deref().unwrap_or("never"),
        ));
    }
    out
}

pub fn conversation_table(conversations: &[Conversation]) -> String {
    if conversations.is_empty() {
        return "No conversations.".to_string();
    }
    let mut out = format!("{:<36}  {:<19}  TITLE\n", "ID", "UPDATED");
    for conversation in conversations {
        out.push_str(&format!(
            "{:<36}  {:<19}  {}\n",
            conversation.id,
            truncate(&conversation.updated_at, 19),
            conversation.title,
        ));
    }
    out
}

/// A message with its role, followed by its citations if any.
pub fn message_block(message: &Message) -> String {
    let mut out = format!("{}: {}", message.role, message.content);
    if let MessageState::Failed { reason } = &message.state {
        out.push_str(&format!("\n  [incomplete: {}]", reason));
    }
    if let Some(sources) = message.sources.as_deref()
        && !sources.is_empty()
    {
        out.push('\n');
        out.push_str(&sources_block(sources));
    }
    out
}

/// Numbered citation list, e.g. `[1] guide.pdf p.4 (0.87)`.
pub fn sources_block(sources: &[Source]) -> String {
    sources
        .iter()
        .enumerate()
        .map(|(i, source)| {
            let page = source
                .page
                .map(|p| format!(" p.{}", p))
                .unwrap_or_default();
            format!(
                "  [{}] {}{} ({:.2})",
                i + 1,
                source.doc_name,
                page,
                source.relevance_score
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let kept: String = text.chars().take(width.saturating_sub(1)).collect();
    format!("{}…", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ragstream_core::{ConnectorStatus, ConnectorType, Role};

    fn doc(status: DocumentStatus, progress: Option<u8>, error: Option<&str>) -> Document {
        Document {
            id: "d1".into(),
            filename: "report.pdf".into(),
            source_type: None,
            file_type: Some(".pdf".into()),
            status,
            progress,
            error_message: error.map(String::from),
            file_size: Some(2048),
            chunk_count: Some(14),
            created_at: None,
        }
    }

    #[test]
    fn test_document_status_variants() {
        assert_eq!(
            document_status(&doc(DocumentStatus::Processing, Some(55), None)),
            "processing  55%"
        );
        assert_eq!(
            document_status(&doc(DocumentStatus::Pending, None, None)),
            "pending"
        );
        assert_eq!(
            document_status(&doc(DocumentStatus::Failed, None, Some("unsupported format"))),
            "failed: unsupported format"
        );
        assert_eq!(
            document_status(&doc(DocumentStatus::Completed, None, None)),
            "completed"
        );
    }

    #[test]
    fn test_document_table_has_header_and_row() {
        let table = document_table(&[doc(DocumentStatus::Completed, None, None)]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("ID"));
        assert!(lines[1].contains("report.pdf"));
        assert!(lines[1].contains("2.0 KB"));
        assert!(lines[1].ends_with("completed"));
        assert_eq!(document_table(&[]), "No documents.");
    }

    #[test]
    fn test_connector_table() {
        let connector = Connector {
            id: "k1".into(),
            name: "Team wiki".into(),
            connector_type: ConnectorType::Confluence,
            status: ConnectorStatus::Syncing,
            document_count: 3,
            last_synced: None,
            created_at: None,
        };
        let table = connector_table(&[connector]);
        let row = table.lines().nth(1).unwrap();
        assert!(row.contains("confluence"));
        assert!(row.contains("syncing"));
        assert!(row.ends_with("never"));
    }

    #[test]
    fn test_message_block_with_sources_and_failure() {
        let mut message = Message::assistant_placeholder("a1");
        message.content = "Partial answer".into();
        message.sources = Some(vec![Source {
            doc_name: "guide.pdf".into(),
            page: Some(4),
            chunk_text: "...".into(),
            relevance_score: 0.873,
        }]);
        message.state = MessageState::Failed {
            reason: "connection closed".into(),
        };
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(
            message_block(&message),
            "assistant: Partial answer\n  [incomplete: connection closed]\n  [1] guide.pdf p.4 (0.87)"
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_truncate_long_names() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-file-name.pdf", 8), "a-very-…");
    }
}
