//! Prompt fragments for answering questions from Nyx data.

/// Instructions for the model that answers from query results.
pub const SYSTEM_PREFIX: &str = "\
You are an agent designed to interact with an SQLite database containing data from a decentralized file sharing \
application. Given an input question, create a syntactically correct query to run against the database, \
then look at the results of the query and return the answer.

Identify the relevant tables to query by examining the nyx_subscriptions table, which contains information about \
each file (table) in the database, including the name, url, description, and table_name. \
If the question is related to available data or subscriptions, respond with a list of all entries from the \
nyx_subscriptions table, including the name, description, and url for each entry.

Some tables contain a column called \"context\", this is a chunk that contains information from relevant files.

If the question does not seem related to the database, respond with: \"I am not sure what data you're talking about. \
Please try asking again, referencing the specific data you're interested in.\"

Do not make any DML statements (INSERT, UPDATE, DELETE, DROP, etc.) to the database. \
Order the results by a relevant column to return the most interesting examples, unless the user \
specifies a specific number of examples they wish to obtain.";

/// Instructions for the model that writes the SQL.
pub const SQL_PREFIX: &str = "\
You write SQLite queries. Reply with exactly one read-only SQL statement (SELECT or WITH) and nothing else, \
no explanation and no markdown. Select only the columns needed to answer the question and always include \
the table_name and url of the sources from nyx_subscriptions when they are relevant.";

/// Appends the answering rules and the database description to `prompt`.
pub fn build_query(prompt: &str, database_info: &str) -> String {
    format!(
        "{prompt} Do not talk as if you are getting the results from a database, each table in the database is \
a file from a source. If there are no tables in the schema, or you can't see relevant ones, JUST RESPOND WITH \
the text 'I don't know', nothing else.\n\
All urls should be left in the same format, do not strip query params from the urls. \
If you cannot find an exact match when looking for relevant tables, attempt to answer the query \
using the most relevant table, only provide the answer if it answers the users query.\n\
Database information:\n{database_info}"
    )
}

/// Like [`build_query`], additionally asking for the sources of the answer.
pub fn with_sources(prompt: &str, database_info: &str) -> String {
    build_query(
        &format!(
            "{prompt} Also, using the table nyx_subscriptions where table_name is the name of the table the \
information came from, retrieve the source and url of the relevant table queried. \
When you go to say table, actually say sources. Output in markdown list format. \
You must include sources for all requests, where the table the results came from matches the table_name \
in nyx_subscriptions, and the relevant url from that table."
        ),
        database_info,
    )
}

/// Asks for a JSON answer carrying a confidence score between 0 and 1.
pub fn with_confidence(prompt: &str) -> String {
    format!(
        "{prompt} Do not talk as if you are getting the results from a database, each table in the database is \
a file from a source. Do not make any mention of any sources in your answer. If there are no tables \
in the schema, or you can't see relevant ones, JUST RESPOND WITH the text 'I don't know', nothing else. \
Also, provide a confidence score between 0 and 1 for your answer. The response should be of the format: \
{{\"content\": \"<your response>\", \"confidence\": <your confidence score>}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query() {
        let prompt = build_query("How wet was March?", "CREATE TABLE rainfall (month TEXT)");
        assert!(prompt.starts_with("How wet was March? "));
        assert!(prompt.contains("'I don't know'"));
        assert!(prompt.ends_with("Database information:\nCREATE TABLE rainfall (month TEXT)"));
    }

    #[test]
    fn test_with_sources() {
        let prompt = with_sources("How wet was March?", "");
        assert!(prompt.starts_with("How wet was March? Also"));
        assert!(prompt.contains("nyx_subscriptions"));
        assert!(prompt.contains("Database information:"));
    }

    #[test]
    fn test_with_confidence() {
        let prompt = with_confidence("Q?");
        assert!(prompt.starts_with("Q? "));
        assert!(prompt.ends_with(r#"{"content": "<your response>", "confidence": <your confidence score>}"#));
    }
}
