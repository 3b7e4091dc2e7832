// schema/fields.rs - 保留名称常量定义
//! 统一管理索引目录中的文件名、结果中的保留键以及分词器名，避免魔法字符串

/// Schema 描述文件（与索引文件放在同一目录）
pub const SCHEMA_FILE: &str = "_schema.json";
/// 结果行中的相关度得分键
pub const SCORE_KEY: &str = "_score";
/// tantivy 的元数据文件，用于判断目录中是否已有索引
pub const INDEX_META_FILE: &str = "meta.json";
/// tantivy 记录受管文件的清单
pub const MANAGED_FILE: &str = ".managed.json";

/// 默认分词器（tantivy 内置）
pub const TOKENIZER_DEFAULT: &str = "default";
/// 不分词，整串作为一个词项
pub const TOKENIZER_RAW: &str = "raw";
/// 英文词干分词器（tantivy 内置）
pub const TOKENIZER_STEMMED: &str = "en_stem";
/// 中文分词器（需要注册）
pub const TOKENIZER_JIEBA: &str = "jieba";
