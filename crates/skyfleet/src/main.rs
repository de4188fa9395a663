mod commands;
mod util;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "sky")]
#[command(about = "EC2フリートのライフサイクルを、ひとつのCLIで。", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// SSH接続オプション（対象インスタンス全てに共通）
#[derive(Args)]
struct SshArgs {
    /// SSH秘密鍵のパス
    #[arg(short = 'i', long, env = "SKYFLEET_SSH_KEY")]
    ssh_key: Option<PathBuf>,

    /// SSH接続ユーザー名
    #[arg(long, default_value = "ubuntu")]
    ssh_user: String,
}

impl SshArgs {
    fn to_options(&self) -> skyfleet_ssh::SshOptions {
        skyfleet_ssh::SshOptions {
            key_path: self.ssh_key.clone(),
            user: self.ssh_user.clone(),
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// インスタンス上でコマンドを実行
    Execute {
        /// 対象インスタンス（IDまたはNameタグ）
        #[arg(required = true)]
        instances: Vec<String>,

        /// 実行するコマンド（複数指定可、指定順に実行）
        #[arg(short = 'c', long = "cmd", required = true)]
        commands: Vec<String>,

        /// コマンドの失敗を無視して続行する
        #[arg(long)]
        ignore_errors: bool,

        /// 実行結果をJSONで出力
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        ssh: SshArgs,
    },
    /// 起動済みインスタンスを初期化（EFSマウント、Docker再起動等）
    Initialize {
        /// 対象インスタンス（IDまたはNameタグ）
        #[arg(required = true)]
        instances: Vec<String>,

        /// 探索をこのインスタンスで一度だけ行い、結果を流用する
        #[arg(long)]
        emulate: Option<String>,

        #[command(flatten)]
        ssh: SshArgs,
    },
    /// 新しいインスタンスを起動
    Launch {
        /// 新しいインスタンス名（重複不可）
        #[arg(required = true)]
        names: Vec<String>,

        /// 起動イメージ（IDまたは名前）
        #[arg(long, conflicts_with = "clone_instance")]
        image: Option<String>,

        /// 複製元インスタンス（一時イメージを作成して起動）
        #[arg(long = "clone", value_name = "INSTANCE")]
        clone_instance: Option<String>,

        /// インスタンスタイプ
        #[arg(short = 't', long)]
        instance_type: Option<String>,

        /// キーペア名
        #[arg(short = 'k', long)]
        key_pair: Option<String>,

        /// セキュリティグループ（複数指定可）
        #[arg(short = 'g', long = "security-group")]
        security_groups: Vec<String>,

        /// EBSデバイス名
        #[arg(long, default_value = "/dev/sda1")]
        ebs_device: String,

        /// EBSボリュームサイズ (GB)
        #[arg(long)]
        ebs_size: Option<i32>,

        /// シャットダウン時の挙動 (stop | terminate)
        #[arg(long)]
        shutdown_behavior: Option<String>,

        /// 追加タグ (KEY=VALUE)
        #[arg(long = "tag", value_name = "KEY=VALUE")]
        tags: Vec<String>,
    },
    /// セキュリティグループのルールを管理
    #[command(subcommand)]
    Network(NetworkCommands),
    /// インスタンスを再起動し、復帰を待つ
    Reboot {
        /// 対象インスタンス（IDまたはNameタグ）
        #[arg(required = true)]
        instances: Vec<String>,
    },
    /// インスタンス・イメージ・セキュリティグループを一覧表示
    Resources {
        /// JSONで出力
        #[arg(long)]
        json: bool,
    },
    /// インスタンスを停止
    Shutdown {
        /// 対象インスタンス（IDまたはNameタグ）
        #[arg(required = true)]
        instances: Vec<String>,

        /// 停止後にterminateする
        #[arg(long)]
        terminate: bool,

        /// 即時停止せず、N分後の自動シャットダウンをSSH経由で予約する
        #[arg(long, value_name = "MINUTES")]
        auto_shutdown_after: Option<u32>,

        #[command(flatten)]
        ssh: SshArgs,
    },
    /// ロードバランサープールのメンバーシップを管理
    #[command(subcommand)]
    Elb(ElbCommands),
    /// S3バケットをローカルにミラー
    #[command(name = "s3-download")]
    S3Download {
        /// バケット名
        bucket: String,

        /// ダウンロード対象のプレフィックス
        #[arg(default_value = "")]
        path: String,

        /// 保存先ディレクトリ
        #[arg(long, default_value = ".")]
        dest: PathBuf,

        /// バケット名/キー階層をそのまま再現する
        #[arg(long)]
        mirror_s3_path: bool,

        /// 保存先ディレクトリが無ければ作成する
        #[arg(long)]
        create_dest_dir: bool,
    },
}

#[derive(Subcommand)]
enum NetworkCommands {
    /// インスタンスの公開アドレスへのルールを許可
    Add {
        /// セキュリティグループ（IDまたは名前）
        security_group: String,
        /// プロトコル (tcp / udp)
        protocol: String,
        from_port: i32,
        to_port: i32,
        /// 対象インスタンス（IDまたはNameタグ）
        instance: String,
        /// アウトバウンドルールとして追加
        #[arg(long)]
        outbound: bool,
    },
    /// CIDRに対するルールを削除
    Remove {
        /// セキュリティグループ（IDまたは名前）
        security_group: String,
        /// プロトコル (tcp / udp)
        protocol: String,
        from_port: i32,
        to_port: i32,
        /// 削除対象のCIDR
        cidr: String,
        /// アウトバウンドルールを削除
        #[arg(long)]
        outbound: bool,
    },
    /// インスタンスを全セキュリティグループのルールから除去
    Purge {
        /// 対象インスタンス（IDまたはNameタグ）
        instance: String,
    },
}

#[derive(Subcommand)]
enum ElbCommands {
    /// プールとターゲットの状態を表示
    List {
        /// プール名（省略時は全プール）
        pool: Option<String>,
    },
    /// インスタンスをプールに追加
    Add {
        /// プール名
        pool: String,
        /// 対象インスタンス（IDまたはNameタグ）
        #[arg(required = true)]
        instances: Vec<String>,
    },
    /// インスタンスをプールから除去
    Remove {
        /// プール名
        pool: String,
        /// 対象インスタンス（IDまたはNameタグ）
        #[arg(required = true)]
        instances: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Execute {
            instances,
            commands,
            ignore_errors,
            json,
            ssh,
        } => {
            commands::execute::handle(&instances, &commands, ignore_errors, json, &ssh.to_options())
                .await?;
        }
        Commands::Initialize {
            instances,
            emulate,
            ssh,
        } => {
            commands::initialize::handle(&instances, emulate, &ssh.to_options()).await?;
        }
        Commands::Launch {
            names,
            image,
            clone_instance,
            instance_type,
            key_pair,
            security_groups,
            ebs_device,
            ebs_size,
            shutdown_behavior,
            tags,
        } => {
            commands::launch::handle(commands::launch::LaunchArgs {
                names,
                image,
                clone_instance,
                instance_type,
                key_pair,
                security_groups,
                ebs_device,
                ebs_size,
                shutdown_behavior,
                tags,
            })
            .await?;
        }
        Commands::Network(network) => {
            commands::network::handle(network).await?;
        }
        Commands::Reboot { instances } => {
            commands::reboot::handle(&instances).await?;
        }
        Commands::Resources { json } => {
            commands::resources::handle(json).await?;
        }
        Commands::Shutdown {
            instances,
            terminate,
            auto_shutdown_after,
            ssh,
        } => {
            commands::shutdown::handle(&instances, terminate, auto_shutdown_after, &ssh.to_options())
                .await?;
        }
        Commands::Elb(elb) => {
            commands::elb::handle(elb).await?;
        }
        Commands::S3Download {
            bucket,
            path,
            dest,
            mirror_s3_path,
            create_dest_dir,
        } => {
            commands::s3_download::handle(&bucket, &path, &dest, mirror_s3_path, create_dest_dir)
                .await?;
        }
    }

    Ok(())
}
