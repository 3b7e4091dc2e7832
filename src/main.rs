// main.rs
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jsonsearch::{IndexBuilder, SearchIndex};

const USAGE: &str = "\
用法:
  jsonsearch create <dir> <schema.json>   创建索引
  jsonsearch add <dir> <docs.jsonl>       逐行添加文档并提交
  jsonsearch search <dir> <query-json>    执行查询
  jsonsearch count <dir>                  已提交文档数";

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "jsonsearch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["create", dir, schema] => create(dir, schema),
        ["add", dir, docs] => add(dir, docs),
        ["search", dir, query] => search(dir, query),
        ["count", dir] => count(dir),
        _ => {
            eprintln!("{USAGE}");
            bail!("invalid arguments");
        }
    }
}

fn create(dir: &str, schema_path: &str) -> Result<()> {
    let schema_json = fs::read_to_string(schema_path)
        .with_context(|| format!("读取 Schema 文件失败: {schema_path}"))?;
    let index = IndexBuilder::new().with_path(dir).create(&schema_json)?;
    let schema = index.schema()?;
    println!(" [索引] 已创建 {} ({} 个字段)", dir, schema.fields().len());
    index.close()?;
    Ok(())
}

fn add(dir: &str, docs_path: &str) -> Result<()> {
    let index = SearchIndex::open(dir)?;
    let file = fs::File::open(Path::new(docs_path))
        .with_context(|| format!("打开文档文件失败: {docs_path}"))?;

    let mut added = 0usize;
    let mut failed = 0usize;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match index.add_doc(&line) {
            Ok(()) => added += 1,
            Err(e) => {
                warn!(line = lineno + 1, error = %e, "skipping document");
                failed += 1;
            }
        }
    }

    index.commit()?;
    info!(added, failed, "documents committed");
    println!(" [索引] 新增 {added} 篇，跳过 {failed} 篇，共 {} 篇", index.num_docs()?);
    index.close()?;
    Ok(())
}

fn search(dir: &str, query: &str) -> Result<()> {
    let index = IndexBuilder::new().with_path(dir).read_only(true).open()?;
    let results = index.search(query)?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    index.close()?;
    Ok(())
}

fn count(dir: &str) -> Result<()> {
    let index = IndexBuilder::new().with_path(dir).read_only(true).open()?;
    println!("{}", index.num_docs()?);
    index.close()?;
    Ok(())
}
