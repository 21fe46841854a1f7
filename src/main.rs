use bookforge::{ConvertOptions, EngineConfig, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// 📚 BookForge - 书籍转换工具
#[derive(Parser)]
#[command(name = "bookforge")]
#[command(about = "把结构化书籍源文件转换为EPUB，并为每个输出文件生成source map")]
#[command(version)]
struct Args {
    /// 详细输出模式
    #[arg(short, long, global = true, help = "输出调试日志")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 转换 books.xml 中登记的所有书籍
    Convert {
        /// books.xml 路径
        #[arg(help = "书籍目录下的 META-INF/books.xml")]
        manifest: PathBuf,

        /// 输出目录
        #[arg(help = "每本书输出到 <输出目录>/<slug>/")]
        output: PathBuf,

        /// 配置文件
        #[arg(short, long, help = "YAML格式的引擎配置文件")]
        config: Option<PathBuf>,

        /// 打包为 .epub
        #[arg(short, long, help = "额外生成 <输出目录>/<slug>.epub")]
        zip: bool,
    },
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        #[arg(default_value = "bookforge.yaml")]
        path: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ 错误: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Convert {
            manifest,
            output,
            config,
            zip,
        } => {
            let config = EngineConfig::load(config.as_deref())?;
            let options = ConvertOptions { output, zip };
            let books = bookforge::convert(&manifest, &options, config)?;

            println!("🎉 转换完成, 共 {} 本书:", books.len());
            for book in books {
                match &book.epub {
                    Some(epub) => println!("  📖 {} → {}", book.slug, epub.display()),
                    None => println!("  📖 {} → {}", book.slug, book.root.display()),
                }
            }
        }
        Command::InitConfig { path } => {
            EngineConfig::generate_default_config(&path)?;
            println!("✅ 已生成默认配置文件: {}", path.display());
        }
    }
    Ok(())
}
